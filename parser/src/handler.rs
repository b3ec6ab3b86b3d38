use crate::extract::Extractor;
use codec::PackageCodec;
use common::hooks::Hooks;
use common::model::frame::Frame;
use common::sink::TaskSink;
use log::{debug, warn};
use std::sync::Arc;
use utils::urlnorm;

/// Immutable parse-side wiring shared by every accepted connection.
pub(crate) struct ParserContext {
    pub codec: PackageCodec,
    pub sink: Arc<dyn TaskSink>,
    pub extractor: Arc<dyn Extractor>,
    pub hooks: Arc<dyn Hooks>,
    pub max_depth: u32,
    pub allow_domains: Vec<String>,
}

/// Rejection holds exactly when `depth >= max_depth` and the limit is
/// enabled.
pub(crate) fn depth_exceeded(depth: u32, max_depth: u32) -> bool {
    max_depth > 0 && depth >= max_depth
}

/// Processes one inbound frame and returns the encoded reply, if any.
/// Heartbeats and undecodable frames produce no reply; a download
/// frame always acks, however many sub-URLs survived filtering.
pub(crate) async fn handle_message(ctx: &ParserContext, data: &[u8]) -> Option<Vec<u8>> {
    let frame: Frame = match ctx.codec.disassemble(data) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("dropping undecodable frame: {e}");
            return None;
        }
    };

    let (task, download_data, binary_type) = match frame {
        Frame::Ping { interval, .. } => {
            debug!("heartbeat received (interval {interval}s)");
            return None;
        }
        Frame::Ack { .. } => return None,
        Frame::Download {
            task,
            download_data,
            binary_type,
        } => (task, download_data, binary_type),
    };

    metrics::counter!("parser_tasks_received_total").increment(1);
    let extraction = ctx.extractor.extract(&task, &download_data, binary_type);
    if !extraction.fields.is_empty() {
        debug!(
            "task {} extracted {} field(s)",
            task.id,
            extraction.fields.len()
        );
    }

    let mut admitted = 0usize;
    for link in extraction.links {
        let Some(url) = urlnorm::resolve(&link, &task.url) else {
            continue;
        };
        let sub = task.derive(url);
        if depth_exceeded(sub.depth, ctx.max_depth) {
            debug!("sub-url {} past depth limit, dropped", sub.url);
            continue;
        }
        if !urlnorm::domain_allowed(&sub.url, &ctx.allow_domains) {
            debug!("sub-url {} outside allowed domains, dropped", sub.url);
            continue;
        }
        if !ctx.hooks.on_discover_url(&task, &sub.url) {
            debug!("sub-url {} rejected by hook", sub.url);
            continue;
        }
        // A failed re-admission is dropped, never retried.
        match ctx.sink.create_task(sub).await {
            Some(_) => admitted += 1,
            None => metrics::counter!("parser_subtasks_dropped_total").increment(1),
        }
    }

    let reply = Frame::ack(format!("done {admitted} urls"));
    match ctx.codec.assemble(&reply) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("ack assembly failed: {e}");
            None
        }
    }
}
