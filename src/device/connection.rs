use std::convert::Infallible;
use iced::subscription::{self, Subscription};
use futures::{StreamExt, SinkExt};
use futures::channel::mpsc::{unbounded, Sender};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::config::io::ConfigIO;
use crate::config::store::DeviceConfigStore;
use crate::device::btle::BtleplugTransport;
use crate::device::constants::UI_EVENT_CAPACITY;
use crate::device::controller::{spawn_controller, ControllerHandle};
use crate::device::parser::PayloadParser;
use crate::device::presenter::{Presenter, UiEvent};

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Ready(ControllerHandle),
    Ui(UiEvent),
}

async fn run_controller(cancel: CancellationToken, config_io: ConfigIO, mut output: Sender<ControllerEvent>) -> Infallible {
    let (ui_sender, mut ui_receiver) = unbounded::<UiEvent>();
    let presenter = Presenter::new(ui_sender);

    let (store, notice) = DeviceConfigStore::load(config_io).await;
    if let Some(notice) = notice {
        presenter.set_status(notice);
    }

    match BtleplugTransport::new().await {
        Ok(transport) => {
            let (handle, _) = spawn_controller(transport, store, presenter, PayloadParser::default(), cancel);
            if output.send(ControllerEvent::Ready(handle)).await.is_err() {
                error!("Window closed before the controller was ready");
            }
        },
        Err(err) => {
            error!("Failed to initialize bluetooth: {:?}", err);
            presenter.set_status(format!("Bluetooth is not available: {}", err));
        },
    }

    // ends once the controller (or the presenter above) is dropped
    while let Some(event) = ui_receiver.next().await {
        if output.send(ControllerEvent::Ui(event)).await.is_err() {
            break;
        }
    }
    info!("Controller event stream ended");

    // note: subscription::channel expects the future to never resolve (Infallible)
    futures::future::pending().await
}

pub fn controller_subscription(cancel: CancellationToken, config_io: ConfigIO) -> Subscription<ControllerEvent> {
    struct Controller;

    subscription::channel(
        std::any::TypeId::of::<Controller>(),
        UI_EVENT_CAPACITY,
        move |output| {
            async move {
                run_controller(cancel, config_io, output).await
            }
        },
    )
}
