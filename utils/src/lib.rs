pub mod connector;
pub mod hash;
pub mod logger;
pub mod urlnorm;
