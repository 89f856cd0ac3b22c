use mediagate::{
    AccessBroker, AccessQuery, AccessRequest, AsyncFinish, ChannelPortal, ClientInfo, ObjectTable,
    SandboxDetector,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Route broker logs through the test writer. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Detector confining exactly the listed pids.
pub struct ConfinedPids(pub Vec<u32>);

impl SandboxDetector for ConfinedPids {
    fn is_confined(&self, pid: u32) -> bool {
        self.0.contains(&pid)
    }
}

/// A continuation that is never expected to run.
pub fn discard() -> AsyncFinish {
    Box::new(|_, _| {})
}

/// A continuation delivering `(request, granted)` over a one-shot channel.
pub fn capture() -> (AsyncFinish, oneshot::Receiver<(AccessRequest, bool)>) {
    let (tx, rx) = oneshot::channel();
    let finish: AsyncFinish = Box::new(move |request, granted| {
        let _ = tx.send((*request, granted));
    });
    (finish, rx)
}

/// Plain broker over a fresh object table.
pub fn plain_broker() -> (AccessBroker, Arc<ObjectTable>) {
    let objects = Arc::new(ObjectTable::new());
    let broker = AccessBroker::builder(objects.clone()).build().expect("valid broker");
    (broker, objects)
}

/// Sandbox-aware broker wired to an in-process portal. `confined` pids get
/// the portal policy.
pub fn portal_broker(
    confined: Vec<u32>,
    reply_timeout: Duration,
) -> (AccessBroker, Arc<ObjectTable>, mpsc::UnboundedReceiver<AccessQuery>) {
    let objects = Arc::new(ObjectTable::new());
    let (portal, queries) = ChannelPortal::new();
    let broker = AccessBroker::builder(objects.clone())
        .sandbox_aware(Arc::new(ConfinedPids(confined)))
        .portal(portal)
        .reply_timeout(reply_timeout)
        .build()
        .expect("valid broker");
    (broker, objects, queries)
}

/// A confined client the portal broker will escalate for.
pub fn sandboxed_client(broker: &AccessBroker, index: u32, pid: u32) {
    broker.client_put(&ClientInfo::new(index).with_pid(pid));
}
