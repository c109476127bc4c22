//! Protocol bindings
//!
//! A binding owns a [`ConnectionCore`] and a [`Connector`]. It turns the
//! connector's normalized callbacks into journal entries and state changes,
//! and exposes the protocol's command surface (`send`, `subscribe`, ...).

use crate::error::RealtimeResult;
use crate::session::connection::ConnectionCore;
use crate::transport::{Connector, EventSink};
use std::sync::Arc;
use tracing::debug;

pub mod mqtt;
pub mod socketio;
pub mod websocket;

pub use mqtt::{MqttConnection, MqttMessage};
pub use socketio::SocketIoConnection;
pub use websocket::WebSocketConnection;

type Outbound<C> = <C as Connector>::Outbound;
type Inbound<C> = <C as Connector>::Inbound;

/// Shared state behind a binding's `Arc`
pub(crate) trait Driver: Send + Sync + 'static {
    type Connector: Connector;
    type Payload: Clone + Send + 'static;

    fn core(&self) -> &ConnectionCore<Self::Payload, Outbound<Self::Connector>>;

    fn connector(&self) -> &Self::Connector;

    /// Protocol-specific handling of one inbound message
    fn on_message(&self, generation: u64, message: Inbound<Self::Connector>);
}

/// Start a transport for `driver`
///
/// The sink captures only a weak handle and the generation; callbacks that
/// outlive the binding or belong to a replaced transport are dropped.
pub(crate) fn connect<D: Driver>(
    driver: &Arc<D>,
    config: &<D::Connector as Connector>::Config,
) -> RealtimeResult<()> {
    let core = driver.core();
    let generation = core.begin_connect()?;
    let span = crate::connection_span!(protocol = core.protocol(), generation);
    let _entered = span.enter();

    let weak = Arc::downgrade(driver);
    let sink = EventSink::new(move |event| {
        let Some(driver) = weak.upgrade() else {
            return;
        };
        if let Some(message) = driver.core().lifecycle(generation, event) {
            driver.on_message(generation, message);
        }
    });

    match driver.connector().open(config, sink) {
        Ok(handle) => {
            if !core.attach(generation, handle) {
                debug!("Transport superseded before it was attached");
            }
        }
        Err(e) => core.abort_connect(generation, &e),
    }
    Ok(())
}
