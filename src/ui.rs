//! Desktop window.
//!
//! [`SaveItApp`] renders the last [`LoginSnapshot`] published by the backend and
//! forwards button presses as [`BackendCommand`]s. It never talks to Telegram
//! itself.

use std::{sync::mpsc::Receiver, time::Duration};

use eframe::egui;
use log::{debug, warn};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    bot::{BackendCommand, UiEvent},
    login::{Field, LoginForm, LoginSnapshot, LoginState},
};

/// Title of the window.
pub const WINDOW_TITLE: &str = "SaveIt Telegram Bot";

const SUBTITLE: &str = "Self-Hosted Media Saver";

/// Lines kept in the activity log.
const MAX_LOG_LINES: usize = 200;

/// The saver window.
pub struct SaveItApp {
    /// Commands to the backend
    cmd_tx: UnboundedSender<BackendCommand>,
    /// Events from the backend
    ui_rx: Receiver<UiEvent>,
    /// Values typed by the user
    form: LoginForm,
    /// Last state published by the backend
    snapshot: LoginSnapshot,
    /// Trigger shown once the saver runs
    trigger: String,
    /// Activity log, oldest first
    logs: Vec<String>,
    /// An advance was sent and its snapshot is not back yet
    pending: bool,
    /// The backend disconnected, the window must close
    closed: bool,
}

impl SaveItApp {
    /// Creates the window with a form prefilled from `form`.
    pub fn new(
        cmd_tx: UnboundedSender<BackendCommand>,
        ui_rx: Receiver<UiEvent>,
        form: LoginForm,
        trigger: &str,
    ) -> Self {
        SaveItApp {
            cmd_tx,
            ui_rx,
            form,
            snapshot: LoginSnapshot::default(),
            trigger: trigger.to_owned(),
            logs: Vec::new(),
            pending: false,
            closed: false,
        }
    }

    /// Applies every event published since the last frame.
    fn process_ui_events(&mut self) {
        while let Ok(event) = self.ui_rx.try_recv() {
            match event {
                UiEvent::Login(snapshot) => {
                    self.pending = false;
                    self.snapshot = snapshot;
                }
                UiEvent::Log(line) => self.push_log(line),
                UiEvent::Closed => {
                    debug!("backend closed");
                    self.closed = true;
                }
            }
        }
    }

    fn push_log(&mut self, line: String) {
        self.logs.push(line);
        if self.logs.len() > MAX_LOG_LINES {
            let overflow = self.logs.len() - MAX_LOG_LINES;
            self.logs.drain(..overflow);
        }
    }

    fn send(&mut self, command: BackendCommand) -> bool {
        if self.cmd_tx.send(command).is_err() {
            warn!("backend is unavailable");
            self.snapshot.notice = Some("Error: backend is unavailable".to_owned());
            return false;
        }
        true
    }

    /// Sends the form for the current stage.
    fn submit(&mut self) {
        if self.pending || self.snapshot.state == LoginState::Authenticated {
            return;
        }
        self.pending = self.send(BackendCommand::Advance(self.form.clone()));
    }

    fn logout(&mut self) {
        self.send(BackendCommand::Logout);
    }

    fn show_form(&mut self, ui: &mut egui::Ui) {
        let state = self.snapshot.state;

        egui::Grid::new("login_form")
            .num_columns(2)
            .spacing([12.0, 8.0])
            .show(ui, |ui| {
                for field in state.required_fields() {
                    self.show_field(ui, *field);
                }
            });

        if let Some(notice) = &self.snapshot.notice {
            ui.add_space(8.0);
            ui.colored_label(egui::Color32::RED, notice);
        }

        ui.add_space(12.0);
        let button = ui.add_enabled(!self.pending, egui::Button::new(state.action_label()));
        if button.clicked() {
            self.submit();
        }
        if self.pending {
            ui.spinner();
        }
    }

    fn show_field(&mut self, ui: &mut egui::Ui, field: Field) {
        ui.label(field.label());
        ui.vertical(|ui| {
            let edit = egui::TextEdit::singleline(self.form.value_mut(field))
                .hint_text(field.hint())
                .password(field.is_secret());
            ui.add(edit);
            if let Some(error) = self.snapshot.field_errors.get(&field) {
                ui.colored_label(egui::Color32::RED, error);
            }
        });
        ui.end_row();
    }

    fn show_running(&mut self, ui: &mut egui::Ui) {
        let name = self
            .snapshot
            .account
            .as_ref()
            .map(|account| account.first_name.as_str())
            .unwrap_or_default();

        ui.heading(format!("Welcome, {}!", name));
        ui.colored_label(
            egui::Color32::GREEN,
            format!("Bot Active. Reply '{}'", self.trigger),
        );

        ui.add_space(8.0);
        ui.separator();
        egui::ScrollArea::vertical()
            .max_height(220.0)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for line in &self.logs {
                    ui.label(line);
                }
            });
        ui.separator();

        if ui.button("Logout").clicked() {
            self.logout();
        }
    }
}

impl eframe::App for SaveItApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_ui_events();

        if self.closed {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            return;
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(16.0);
                ui.heading(WINDOW_TITLE);
                ui.label(SUBTITLE);
                ui.add_space(16.0);

                if self.snapshot.state == LoginState::Authenticated {
                    self.show_running(ui);
                } else {
                    self.show_form(ui);
                }
            });
        });

        // Backend events do not wake the window up
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}
