use crate::core::types::{RoutingKey, SignalType};
use crate::pdata::{LogRecord, Resource};
use crate::signals::SignalAdapter;

/// Routes log records by the trace id they are correlated with
///
/// Records without a trace id all share the fallback endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAdapter;

impl SignalAdapter for LogAdapter {
    type Item = LogRecord;

    fn signal(&self) -> SignalType {
        SignalType::Logs
    }

    fn routing_key(&self, _resource: &Resource, record: &LogRecord) -> Option<RoutingKey> {
        record.trace_id.routing_key()
    }
}
