use serde::Serialize;

use crate::structures::LinkState;

/// Point-in-time view of one link, for operators and logs.
#[derive(Debug, Clone, Serialize)]
pub struct LinkStats {
    pub link_id: String,
    pub endpoint: String,
    pub state: LinkState,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub data_events: u64,
    pub connects: u64,
    pub connect_failures: u64,
    pub last_error: String,
}
