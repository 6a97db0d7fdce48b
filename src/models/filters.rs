use super::enums::AlertType;

/// Which alerts to return by resolution state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolutionFilter {
    /// Open alerts that have not been superseded by a newer window.
    #[default]
    Unresolved,
    Resolved,
    All,
}

#[derive(Debug, Default)]
pub struct AlertFilter {
    pub alert_type: Option<AlertType>,
    pub resolution: ResolutionFilter,
}
