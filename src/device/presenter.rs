use futures::channel::mpsc::UnboundedSender;
use log::debug;
use uuid::Uuid;

use crate::device::subscriptions::ParsedData;

/// A selectable row; `id` is what gets sent back when the user picks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry<Id> {
    pub id: Id,
    pub text: String,
}

impl<Id> std::fmt::Display for ListEntry<Id> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

/// Which user actions make sense in the current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionSet {
    pub scan: bool,
    pub connect: bool,
    pub disconnect: bool,
    pub subscribe: bool,
    pub unsubscribe: bool,
}

/// Answer to [`UiEvent::PinRequested`]. `None` means the user cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinReply(pub Option<PinEntry>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinEntry {
    pub pin: String,
    pub remember: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Status(String),
    Devices(Vec<ListEntry<String>>),
    Characteristics(Vec<ListEntry<Uuid>>),
    Actions(ActionSet),
    Subscriptions(Vec<Uuid>),
    Data(ParsedData),
    PinRequested { address: String },
}

/// The controller's only way to reach the window.
#[derive(Clone)]
pub struct Presenter {
    sender: UnboundedSender<UiEvent>,
}

impl Presenter {
    pub fn new(sender: UnboundedSender<UiEvent>) -> Self {
        Presenter { sender }
    }

    fn emit(&self, event: UiEvent) {
        if self.sender.unbounded_send(event).is_err() {
            debug!("Window is gone, dropping ui event");
        }
    }

    pub fn set_status(&self, text: impl Into<String>) {
        self.emit(UiEvent::Status(text.into()));
    }

    pub fn set_devices(&self, devices: Vec<ListEntry<String>>) {
        self.emit(UiEvent::Devices(devices));
    }

    pub fn set_characteristics(&self, characteristics: Vec<ListEntry<Uuid>>) {
        self.emit(UiEvent::Characteristics(characteristics));
    }

    pub fn set_actions(&self, actions: ActionSet) {
        self.emit(UiEvent::Actions(actions));
    }

    pub fn set_subscriptions(&self, characteristics: Vec<Uuid>) {
        self.emit(UiEvent::Subscriptions(characteristics));
    }

    pub fn data_received(&self, data: ParsedData) {
        self.emit(UiEvent::Data(data));
    }

    pub fn request_pin(&self, address: &str) {
        self.emit(UiEvent::PinRequested { address: address.to_string() });
    }
}
