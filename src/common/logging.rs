use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use time::macros::format_description;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// JSON lines on stderr, so the probe's stdout stays clean for stats output.
/// The library never calls this; embedding applications pick their own subscriber.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let timer = UtcTime::new(format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z"));

    let fmt_layer = fmt::layer()
        .event_format(fmt::format().json().with_current_span(false).with_span_list(false))
        .fmt_fields(fmt::format::JsonFields::new())
        .with_timer(timer)
        .with_writer(std::io::stderr);

    // Keeps the first subscriber if one is already installed
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

/// Eight hex characters, enough to tell links apart in one process's logs.
pub fn short_uuid() -> String {
    let id = uuid::Uuid::new_v4().to_string();
    id.split('-').next().unwrap_or(&id).to_string()
}

pub mod events {
    pub const APP_START: &str = "app_start";
    pub const APP_SHUTDOWN: &str = "app_shutdown";

    pub const LINK_CONNECT: &str = "link_connect";
    pub const LINK_CONNECT_FAILED: &str = "link_connect_failed";
    pub const LINK_DISCONNECT: &str = "link_disconnect";

    pub const RECEIVE_START: &str = "receive_start";
    pub const RECEIVE_DATA: &str = "receive_data";
    pub const RECEIVE_STOP: &str = "receive_stop";
    pub const RECEIVE_ERROR: &str = "receive_error";

    pub const SEND: &str = "send";
    pub const SEND_ERROR: &str = "send_error";

    pub const PEER_CLOSED: &str = "peer_closed";
    pub const PEER_RESET: &str = "peer_reset";
}

#[cfg(test)]
mod tests {
    use super::{init, short_uuid};

    #[test]
    fn short_uuid_is_first_group() {
        let id = short_uuid();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn init_twice_keeps_first_subscriber() {
        init();
        init();
        tracing::info!(msg = "still logging");
    }
}
