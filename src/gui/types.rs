use iced::{Event, window};
use uuid::Uuid;

use crate::device::connection::ControllerEvent;
use crate::device::presenter::ListEntry;

#[derive(Debug, Clone)]
pub enum PinChange {
    Input(String),
    RememberToggle(bool),
    Submit,
    Cancel,
}

#[derive(Debug, Clone)]
pub enum Message {
    EventOccurred(Event),
    Controller(ControllerEvent),
    // the controller has disconnected, the window can close now
    ControllerStopped(window::Id),
    ScanPress,
    DeviceSelected(ListEntry<String>),
    ConnectPress,
    DisconnectPress,
    CharacteristicSelected(Uuid),
    SubscribePress,
    UnsubscribePress,
    Pin(PinChange),
    ClearLog,
}
