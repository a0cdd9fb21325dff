//! Offline actuator for dry runs.
//!
//! Tracks the location a real browser would be at and logs every action, so
//! goals can be rehearsed without a browser attached.

use std::path::PathBuf;

use agent_core::actuation::{ActuationError, ActuationOutcome, Actuator};
use agent_core::model::Observation;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use waymark_core_types::Action;

pub const BLANK_LOCATION: &str = "about:blank";
const SEARCH_LOCATION: &str = "https://www.google.com";

/// Smallest valid PNG (1x1, transparent).
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
    0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
];

#[derive(Debug, Default)]
struct Navigation {
    back: Vec<String>,
    current: Option<String>,
    forward: Vec<String>,
}

impl Navigation {
    fn current(&self) -> String {
        self.current
            .clone()
            .unwrap_or_else(|| BLANK_LOCATION.to_string())
    }

    fn visit(&mut self, location: String) {
        if let Some(previous) = self.current.replace(location) {
            self.back.push(previous);
        }
        self.forward.clear();
    }

    fn go_back(&mut self) -> bool {
        let Some(previous) = self.back.pop() else {
            return false;
        };
        if let Some(current) = self.current.replace(previous) {
            self.forward.push(current);
        }
        true
    }

    fn go_forward(&mut self) -> bool {
        let Some(next) = self.forward.pop() else {
            return false;
        };
        if let Some(current) = self.current.replace(next) {
            self.back.push(current);
        }
        true
    }
}

#[derive(Debug, Default)]
pub struct DryRunActuator {
    navigation: Mutex<Navigation>,
    executed: Mutex<Vec<Action>>,
    observations: Mutex<u32>,
    artifact_dir: Option<PathBuf>,
    closed: Mutex<bool>,
}

impl DryRunActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a synthetic observation path under `dir` for every snapshot.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    pub fn executed(&self) -> Vec<Action> {
        self.executed.lock().clone()
    }

    fn ensure_open(&self) -> Result<(), ActuationError> {
        if *self.closed.lock() {
            return Err(ActuationError::EnvironmentClosed(
                "dry-run environment was shut down".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Actuator for DryRunActuator {
    async fn execute(&self, action: &Action) -> Result<ActuationOutcome, ActuationError> {
        self.ensure_open()?;
        self.executed.lock().push(action.clone());
        let mut navigation = self.navigation.lock();
        let error = match action {
            Action::Navigate { url } => {
                navigation.visit(url.clone());
                None
            }
            Action::Search => {
                navigation.visit(SEARCH_LOCATION.to_string());
                None
            }
            Action::GoBack => (!navigation.go_back()).then(|| "no previous page".to_string()),
            Action::GoForward => (!navigation.go_forward()).then(|| "no next page".to_string()),
            _ => None,
        };
        let location = navigation.current();
        debug!(action = %action.kind(), %location, "dry-run action");
        let outcome = ActuationOutcome::at(location);
        Ok(match error {
            Some(error) => outcome.with_error(error),
            None => outcome,
        })
    }

    async fn observe(&self) -> Result<Observation, ActuationError> {
        self.ensure_open()?;
        let mut count = self.observations.lock();
        *count += 1;
        let observation = Observation::png(self.navigation.lock().current(), PLACEHOLDER_PNG.to_vec());
        Ok(match &self.artifact_dir {
            Some(dir) => observation.with_path(
                dir.join(format!("observation_{:04}.png", *count))
                    .display()
                    .to_string(),
            ),
            None => observation,
        })
    }

    async fn current_location(&self) -> Result<String, ActuationError> {
        Ok(self.navigation.lock().current())
    }

    async fn shutdown(&self) -> Result<(), ActuationError> {
        *self.closed.lock() = true;
        info!(actions = self.executed.lock().len(), "dry-run environment closed");
        Ok(())
    }
}
