use std::collections::VecDeque;
use std::time::SystemTime;
use iced::{Alignment, Application, Command, Element, Length, Settings, Size, Subscription, window};
use iced::event::{self, Event};
use iced::theme::{self, Theme};
use iced::widget::{
    Column, button, checkbox, column, container, horizontal_rule, pick_list, row, scrollable, text, text_input,
};
use log::{info, warn};
use tokio::time::timeout;
use tokio_util::sync::{CancellationToken};
use uuid::Uuid;

use crate::config::io::{ConfigIO};
use crate::device::connection::{controller_subscription, ControllerEvent};
use crate::device::constants::{DATA_LOG_CAPACITY, SHUTDOWN_TIMEOUT};
use crate::device::controller::{ControllerCommand, ControllerHandle};
use crate::device::parser::hex_string;
use crate::device::presenter::{ActionSet, ListEntry, PinEntry, PinReply, UiEvent};
use crate::device::subscriptions::ParsedData;
use crate::error::AppRunError;
use crate::gui::executor::MyExecutor;
use crate::gui::style::ListRowStyleSheet;
use crate::gui::types::{Message, PinChange};

pub struct ApplicationFlags {
    config_io: ConfigIO,
}

struct DataLogEntry {
    time: String,
    characteristic: Uuid,
    raw_hex: String,
    text: String,
}

impl DataLogEntry {
    fn new(data: ParsedData) -> Self {
        // "2024-05-01T12:34:56.789Z" => "12:34:56.789"
        let timestamp = humantime::format_rfc3339_millis(SystemTime::now()).to_string();
        let time = timestamp.get(11..23).unwrap_or(&timestamp).to_string();

        DataLogEntry {
            time,
            characteristic: data.characteristic,
            raw_hex: hex_string(&data.raw),
            text: data.text,
        }
    }
}

struct PinPrompt {
    address: String,
    pin: String,
    remember: bool,
}

pub struct MyApplication {
    // this token is cancelled upon exit
    app_cancel: CancellationToken,
    config_io: ConfigIO,

    // None until the controller task has started
    controller: Option<ControllerHandle>,

    // latest state published by the controller
    status: String,
    devices: Vec<ListEntry<String>>,
    characteristics: Vec<ListEntry<Uuid>>,
    subscribed: Vec<Uuid>,
    actions: ActionSet,
    data_log: VecDeque<DataLogEntry>,

    selected_device: Option<ListEntry<String>>,
    selected_characteristic: Option<Uuid>,
    pin_prompt: Option<PinPrompt>,
}

impl MyApplication {
    fn before_close(&mut self) {
        if self.pin_prompt.take().is_some() {
            self.reply_pin(PinReply(None));
        }
        self.app_cancel.cancel();
    }

    fn send(&self, command: ControllerCommand) {
        if let Some(controller) = &self.controller {
            controller.send(command);
        }
    }

    fn reply_pin(&self, reply: PinReply) {
        if let Some(controller) = &self.controller {
            controller.reply_pin(reply);
        }
    }

    fn on_ui_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Status(status) => {
                self.status = status;
            },
            UiEvent::Devices(devices) => {
                if let Some(selected) = &self.selected_device {
                    if !devices.iter().any(|device| device.id == selected.id) {
                        self.selected_device = None;
                    }
                }
                self.devices = devices;
            },
            UiEvent::Characteristics(characteristics) => {
                if let Some(selected) = self.selected_characteristic {
                    if !characteristics.iter().any(|characteristic| characteristic.id == selected) {
                        self.selected_characteristic = None;
                    }
                }
                self.characteristics = characteristics;
            },
            UiEvent::Actions(actions) => {
                self.actions = actions;
            },
            UiEvent::Subscriptions(subscribed) => {
                self.subscribed = subscribed;
            },
            UiEvent::Data(data) => {
                if self.data_log.len() >= DATA_LOG_CAPACITY {
                    self.data_log.pop_front();
                }
                self.data_log.push_back(DataLogEntry::new(data));
            },
            UiEvent::PinRequested { address } => {
                self.pin_prompt = Some(PinPrompt { address, pin: String::new(), remember: false });
            },
        }
    }

    fn on_pin_change(&mut self, change: PinChange) {
        let Some(prompt) = self.pin_prompt.as_mut() else {
            return;
        };

        match change {
            PinChange::Input(pin) => prompt.pin = pin,
            PinChange::RememberToggle(remember) => prompt.remember = remember,
            PinChange::Submit => {
                if let Some(prompt) = self.pin_prompt.take() {
                    self.reply_pin(PinReply(Some(PinEntry { pin: prompt.pin, remember: prompt.remember })));
                }
            },
            PinChange::Cancel => {
                self.pin_prompt = None;
                self.reply_pin(PinReply(None));
            },
        }
    }

    fn is_subscribed(&self, characteristic: &Uuid) -> bool {
        self.subscribed.contains(characteristic)
    }

    fn pin_view<'a>(&'a self, prompt: &'a PinPrompt) -> Element<'a, Message> {
        let mut ok_button = button(text("OK"));
        if !prompt.pin.trim().is_empty() {
            ok_button = ok_button.on_press(Message::Pin(PinChange::Submit));
        }

        container(
            column![
                text(format!("Enter the pairing PIN for device {}:", prompt.address)),

                text_input("PIN", &prompt.pin)
                    .on_input(|value| Message::Pin(PinChange::Input(value)))
                    .on_submit(Message::Pin(PinChange::Submit))
                    .width(200),

                checkbox("Remember PIN", prompt.remember)
                    .on_toggle(|value| Message::Pin(PinChange::RememberToggle(value))),

                row![
                    ok_button,
                    button(text("Cancel"))
                        .style(theme::Button::Secondary)
                        .on_press(Message::Pin(PinChange::Cancel)),
                ].spacing(20),
            ].align_items(Alignment::Center).spacing(20),
        )
        .width(Length::Fill)
        .padding(20)
        .into()
    }
}

impl Application for MyApplication {
    type Executor = MyExecutor;
    type Message = Message;
    type Theme = Theme;
    type Flags = ApplicationFlags;

    fn new(flags: ApplicationFlags) -> (MyApplication, Command<Self::Message>) {
        let app = MyApplication {
            app_cancel: CancellationToken::new(),
            config_io: flags.config_io,
            controller: None,
            status: "Starting bluetooth...".to_string(),
            devices: Vec::new(),
            characteristics: Vec::new(),
            subscribed: Vec::new(),
            actions: ActionSet::default(),
            data_log: VecDeque::new(),
            selected_device: None,
            selected_characteristic: None,
            pin_prompt: None,
        };

        (app, Command::none())
    }

    fn title(&self) -> String {
        String::from(concat!("BLE Monitor ", env!("CARGO_PKG_VERSION")))
    }

    fn update(&mut self, message: Message) -> Command<Self::Message> {
        match message {
            Message::EventOccurred(Event::Window(id, window::Event::CloseRequested)) => {
                info!("Close requested");
                self.before_close();

                let Some(controller) = self.controller.clone() else {
                    return window::close(id);
                };
                self.status = "Disconnecting...".to_string();
                return Command::perform(
                    async move {
                        if timeout(SHUTDOWN_TIMEOUT, controller.stopped()).await.is_err() {
                            warn!("Controller did not stop within {:?}", SHUTDOWN_TIMEOUT);
                        }
                    },
                    move |_| Message::ControllerStopped(id),
                );
            },
            Message::ControllerStopped(id) => {
                info!("Controller stopped, closing");
                return window::close(id);
            },
            Message::EventOccurred(_) => {},
            Message::Controller(ControllerEvent::Ready(handle)) => {
                info!("Controller ready");
                self.controller = Some(handle);
                self.status = "Ready".to_string();
            },
            Message::Controller(ControllerEvent::Ui(event)) => {
                self.on_ui_event(event);
            },
            Message::ScanPress => {
                self.send(ControllerCommand::Scan);
            },
            Message::DeviceSelected(device) => {
                self.send(ControllerCommand::Select(device.id.clone()));
                self.selected_device = Some(device);
            },
            Message::ConnectPress => {
                if let Some(device) = &self.selected_device {
                    self.send(ControllerCommand::Connect(device.id.clone()));
                } else {
                    self.status = "Select a device first".to_string();
                }
            },
            Message::DisconnectPress => {
                self.send(ControllerCommand::Disconnect);
            },
            Message::CharacteristicSelected(characteristic) => {
                self.selected_characteristic = Some(characteristic);
            },
            Message::SubscribePress => {
                if let Some(characteristic) = self.selected_characteristic {
                    self.send(ControllerCommand::Subscribe(characteristic));
                }
            },
            Message::UnsubscribePress => {
                if let Some(characteristic) = self.selected_characteristic {
                    self.send(ControllerCommand::Unsubscribe(characteristic));
                }
            },
            Message::Pin(change) => {
                self.on_pin_change(change);
            },
            Message::ClearLog => {
                self.data_log.clear();
            },
        }

        Command::none()
    }

    fn subscription(&self) -> Subscription<Message> {
        Subscription::batch([
            event::listen().map(Message::EventOccurred),
            controller_subscription(
                self.app_cancel.clone(),
                self.config_io.clone(),
            ).map(Message::Controller),
        ])
    }

    fn view(&self) -> Element<Message> {
        if let Some(prompt) = &self.pin_prompt {
            return self.pin_view(prompt);
        }

        let action_button = |label: &'static str, enabled: bool, on_press: Message| -> Element<Message> {
            let mut action = button(text(label));
            if enabled {
                action = action.on_press(on_press);
            }
            action.into()
        };

        let selected_subscribed = self.selected_characteristic
            .map_or(false, |characteristic| self.is_subscribed(&characteristic));

        let characteristic_rows = Column::with_children(
            self.characteristics
                .iter()
                .map(|entry| {
                    let marker = if self.is_subscribed(&entry.id) { "● " } else { "" };
                    button(text(format!("{}{}", marker, entry.text)).size(14))
                        .width(Length::Fill)
                        .style(theme::Button::Custom(Box::new(ListRowStyleSheet {
                            selected: self.selected_characteristic == Some(entry.id),
                        })))
                        .on_press(Message::CharacteristicSelected(entry.id))
                })
                .map(Element::from)
        ).spacing(2);

        let data_rows = Column::with_children(
            self.data_log
                .iter()
                .rev()
                .map(|entry| {
                    text(format!(
                        "[{}] {}\nraw: {}\nparsed: {}",
                        entry.time, entry.characteristic, entry.raw_hex, entry.text,
                    )).size(13)
                })
                .map(Element::from)
        ).spacing(8);

        container(
            column![
                pick_list(
                    self.devices.as_slice(),
                    self.selected_device.clone(),
                    Message::DeviceSelected,
                )
                    .placeholder("Scan, then select a device")
                    .width(Length::Fill),

                row![
                    action_button("Scan", self.actions.scan, Message::ScanPress),
                    action_button("Connect", self.actions.connect && self.selected_device.is_some(), Message::ConnectPress),
                    action_button("Disconnect", self.actions.disconnect, Message::DisconnectPress),
                ].spacing(10),

                text(&self.status),

                horizontal_rule(10),

                text("Notifiable characteristics:"),
                scrollable(characteristic_rows).height(Length::FillPortion(1)),

                row![
                    action_button(
                        "Subscribe",
                        self.actions.subscribe && self.selected_characteristic.is_some() && !selected_subscribed,
                        Message::SubscribePress,
                    ),
                    action_button(
                        "Unsubscribe",
                        self.actions.unsubscribe && selected_subscribed,
                        Message::UnsubscribePress,
                    ),
                ].spacing(10),

                horizontal_rule(10),

                row![
                    text("Received data:").width(Length::Fill),
                    action_button("Clear", !self.data_log.is_empty(), Message::ClearLog),
                ].align_items(Alignment::Center),
                scrollable(data_rows).height(Length::FillPortion(2)),
            ]
                .spacing(10)
                .width(Length::Fill),
        )
        .width(Length::Fill)
        .height(Length::Fill)
        .padding(20)
        .into()
    }
}

pub fn run_application() -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let flags = ApplicationFlags { config_io };
    let mut settings = Settings::with_flags(flags);

    // handle exits ourselves (Event::CloseRequested)
    settings.id = Some("ble-monitor".to_string());
    settings.window.exit_on_close_request = false;
    settings.window.size = Size::new(800.0, 600.0);

    // this function will call process::exit() unless there was a startup error
    MyApplication::run(settings)?;
    Ok(())
}
