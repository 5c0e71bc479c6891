use rumqttc::{AsyncClient, ClientError, Event, Outgoing, Packet, QoS};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::debug;

/// Resolves when the broker has acknowledged a QoS 1 publish
pub type PublishAck = oneshot::Receiver<()>;

/// Matches QoS 1 publishes made through a client with the PUBACKs the event
/// loop receives for them
///
/// rumqttc only assigns a packet id when the event loop takes a publish off
/// the request queue, so waiters are queued in request order and bound to the
/// packet id of the next `Outgoing::Publish`. Every publish on the client must
/// go through [`PublishAcks::publish`], otherwise ids get bound to the wrong
/// waiter.
#[derive(Clone, Default)]
pub struct PublishAcks {
    inner: Arc<Mutex<Pending>>,
}

#[derive(Default)]
struct Pending {
    /// Waiters whose publish is still on the request queue
    queued: VecDeque<oneshot::Sender<()>>,
    /// Waiters whose publish went out under a packet id
    in_flight: HashMap<u16, oneshot::Sender<()>>,
}

impl PublishAcks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a QoS 1 publish and return a handle that resolves on its PUBACK
    ///
    /// Fails immediately when the request queue is full or the event loop is
    /// gone.
    pub fn publish(
        &self,
        client: &AsyncClient,
        topic: &str,
        payload: &str,
    ) -> Result<PublishAck, ClientError> {
        let (tx, rx) = oneshot::channel();

        // Enqueue and register under one lock so waiters stay in request order
        let mut pending = self.lock();
        pending.queued.push_back(tx);
        if let Err(e) = client.try_publish(topic, QoS::AtLeastOnce, false, payload) {
            pending.queued.pop_back();
            return Err(e);
        }

        Ok(rx)
    }

    /// Feed an event loop event; only outgoing publishes and PUBACKs matter
    pub fn observe(&self, event: &Event) {
        match event {
            Event::Outgoing(Outgoing::Publish(pkid)) => self.on_outgoing_publish(*pkid),
            Event::Incoming(Packet::PubAck(ack)) => self.on_puback(ack.pkid),
            _ => {}
        }
    }

    fn on_outgoing_publish(&self, pkid: u16) {
        let mut pending = self.lock();
        // Retransmissions after a reconnect reuse an id that is still in flight
        if pending.in_flight.contains_key(&pkid) {
            debug!(pkid, "publish retransmitted");
            return;
        }
        if let Some(tx) = pending.queued.pop_front() {
            pending.in_flight.insert(pkid, tx);
        }
    }

    fn on_puback(&self, pkid: u16) {
        if let Some(tx) = self.lock().in_flight.remove(&pkid) {
            // The waiter may have timed out already
            let _ = tx.send(());
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        // The state stays consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
