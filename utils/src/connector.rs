pub fn create_redis_pool(
    host: &str,
    port: u16,
    db: u16,
    username: &Option<String>,
    password: &Option<String>,
    pool_size: Option<usize>,
) -> Option<deadpool_redis::Pool> {
    let cfg = deadpool_redis::Config {
        connection: Some(deadpool_redis::ConnectionInfo {
            addr: deadpool_redis::ConnectionAddr::Tcp(host.to_string(), port),
            redis: deadpool_redis::RedisConnectionInfo {
                db: db as i64,
                username: username.clone(),
                password: password.clone(),
                ..Default::default()
            },
        }),
        pool: Some(deadpool_redis::PoolConfig {
            max_size: pool_size.unwrap_or(100),
            ..Default::default()
        }),
        ..Default::default()
    };
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1)).ok()
}
