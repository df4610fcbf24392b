//! Proxy layer: the two ways a private endpoint reaches a destination
//!
//! - [`https`]: raw TLS passthrough routed by the Client Hello's SNI
//! - [`connect`]: HTTP CONNECT tunnels to port 443
//!
//! Both paths identify the private endpoint from the PROXY v2 header and
//! ask the [`Authorizer`] before dialing anything.

pub mod connect;
pub mod https;
pub mod proxy_protocol;
pub mod recorder;
pub mod sni;
pub mod tcp;

use futures_util::FutureExt;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Once};
use std::time::Duration;

use crate::dashboard::DashboardApi;
use crate::observability::{AccessLog, AccessLogEntry, GatewayMetrics};
use crate::router::Authorizer;

/// Everything a connection handler needs
pub struct ProxyContext {
    pub authorizer: Arc<Authorizer>,
    pub metrics: Arc<GatewayMetrics>,
    pub access_log: AccessLog,
    pub dashboard: DashboardApi,
    /// Port dialed on allowed destinations
    pub upstream_port: u16,
    /// Budget for the PROXY header plus Client Hello
    pub sniff_timeout: Duration,
    /// Budget for HTTP request headers
    pub header_read_timeout: Duration,
}

impl ProxyContext {
    /// Count and log an admission decision
    pub(crate) fn audit(&self, entry: &AccessLogEntry) {
        self.metrics.record_decision(entry.protocol, entry.outcome);
        self.access_log.record(entry);
    }
}

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Capture a backtrace for every panic so [`spawn_guarded`] can log it.
///
/// The previously installed hook still runs. Safe to call more than once.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            previous(info);
        }));
    });
}

/// Backtrace of the last panic on this thread, if the hook captured one
fn take_panic_backtrace() -> Option<String> {
    PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

/// Spawn a connection task whose panic is logged instead of propagated
pub fn spawn_guarded<F>(name: &'static str, fut: F) -> tokio::task::JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let backtrace = take_panic_backtrace().unwrap_or_else(|| "unavailable".to_string());
            tracing::error!(
                task = name,
                panic = %message,
                backtrace = %backtrace,
                "Connection task panicked"
            );
        }
    })
}
