use dsm_core::models::{Drift, ServiceStatus, UnitStatus};
use dsm_core::services::service_manager::InstallRequest;

/// The active mode determines which UI is shown and how keys are dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    ServiceList,
    InstallDialog,
    ConfirmDialog {
        message: String,
        action: ConfirmAction,
    },
    HelpDialog,
    CheckReport,
    Loading(String),
}

/// What a confirmed dialog action should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmAction {
    RemoveService(String),
    /// Replace an existing service; the request already has `overwrite` set.
    Reinstall(InstallRequest),
    Quit,
}

// ─── Install Form ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InstallField {
    #[default]
    Image,
    Name,
    InternalPort,
    ExternalPort,
    Window,
}

impl InstallField {
    pub fn next(self) -> Self {
        match self {
            Self::Image => Self::Name,
            Self::Name => Self::InternalPort,
            Self::InternalPort => Self::ExternalPort,
            Self::ExternalPort => Self::Window,
            Self::Window => Self::Image,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            Self::Image => Self::Window,
            Self::Name => Self::Image,
            Self::InternalPort => Self::Name,
            Self::ExternalPort => Self::InternalPort,
            Self::Window => Self::ExternalPort,
        }
    }

    pub fn is_port(self) -> bool {
        matches!(self, Self::InternalPort | Self::ExternalPort)
    }
}

/// Form state for the install dialog. Port fields hold raw digits.
#[derive(Debug, Default)]
pub struct InstallForm {
    pub image: String,
    pub name: String,
    pub internal_port: String,
    pub external_port: String,
    pub window: String,
    pub focus: InstallField,
    /// Validation or conflict message shown inside the dialog.
    pub error: Option<String>,
}

impl InstallForm {
    pub fn field_mut(&mut self, field: InstallField) -> &mut String {
        match field {
            InstallField::Image => &mut self.image,
            InstallField::Name => &mut self.name,
            InstallField::InternalPort => &mut self.internal_port,
            InstallField::ExternalPort => &mut self.external_port,
            InstallField::Window => &mut self.window,
        }
    }

    pub fn push_char(&mut self, c: char) {
        let field = self.focus;
        if field.is_port() && !c.is_ascii_digit() {
            return;
        }
        self.field_mut(field).push(c);
        self.error = None;
    }

    pub fn pop_char(&mut self) {
        let field = self.focus;
        self.field_mut(field).pop();
        self.error = None;
    }

    /// Validate locally and build the request; the error is a message for the dialog.
    pub fn to_request(&self) -> Result<InstallRequest, String> {
        let image = self.image.trim();
        if image.is_empty() {
            return Err("Image is required".into());
        }
        let mut request = InstallRequest::new(image);
        request.name = non_empty(&self.name);
        request.window_name = non_empty(&self.window);
        request.internal_port = parse_port("Internal port", &self.internal_port)?;
        request.external_port = parse_port("External port", &self.external_port)?;
        Ok(request)
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_port(label: &str, value: &str) -> Result<Option<u16>, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(Some(port as u16)),
        _ => Err(format!("{label} must be between 1 and 65535")),
    }
}

// ─── Main App State ────────────────────────────────────────────────────

/// Top-level application state.
pub struct App {
    pub mode: Mode,
    pub services: Vec<ServiceStatus>,
    pub selected_index: usize,
    pub should_quit: bool,
    pub status_message: Option<String>,
    pub install_form: InstallForm,
    pub drift: Vec<Drift>,
    /// Name of the session host, shown in the title and help.
    pub session_name: String,
    /// Set by the attach key handler; consumed by the main loop.
    pub attach_target: Option<String>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            mode: Mode::ServiceList,
            services: Vec::new(),
            selected_index: 0,
            should_quit: false,
            status_message: None,
            install_form: InstallForm::default(),
            drift: Vec::new(),
            session_name: "dsm".into(),
            attach_target: None,
        }
    }

    pub fn selected_service(&self) -> Option<&ServiceStatus> {
        self.services.get(self.selected_index)
    }

    pub fn select_next(&mut self) {
        if !self.services.is_empty() {
            self.selected_index = (self.selected_index + 1) % self.services.len();
        }
    }

    pub fn select_prev(&mut self) {
        if !self.services.is_empty() {
            if self.selected_index == 0 {
                self.selected_index = self.services.len() - 1;
            } else {
                self.selected_index -= 1;
            }
        }
    }

    /// Replace the service list, keeping the selection on the same name when possible.
    pub fn set_services(&mut self, services: Vec<ServiceStatus>) {
        let selected = self.selected_service().map(|s| s.record.name.clone());
        self.services = services;
        self.selected_index = selected
            .and_then(|name| self.services.iter().position(|s| s.record.name == name))
            .unwrap_or_else(|| {
                self.selected_index
                    .min(self.services.len().saturating_sub(1))
            });
    }

    pub fn running_count(&self) -> usize {
        self.services
            .iter()
            .filter(|s| s.status == UnitStatus::Running)
            .count()
    }

    pub fn set_status(&mut self, msg: impl Into<String>) {
        self.status_message = Some(msg.into());
    }

    pub fn open_install_dialog(&mut self) {
        self.install_form = InstallForm::default();
        self.mode = Mode::InstallDialog;
    }
}
