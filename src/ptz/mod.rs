//! PTZ commands and the per-camera control session table.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use crate::config::Credentials;
use crate::onvif::{DeviceConnector, DeviceControl};

/// Relative step applied per directional command.
pub const STEP: f32 = 0.1;

/// Pan/tilt/zoom deltas for a relative move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PtzVector {
    pub pan: f32,
    pub tilt: f32,
    pub zoom: f32,
}

impl PtzVector {
    pub const fn pan_tilt(pan: f32, tilt: f32) -> Self {
        Self {
            pan,
            tilt,
            zoom: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Home,
}

/// What a direction asks the device to do.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PtzCommand {
    Move(PtzVector),
    Home,
}

impl Direction {
    pub fn command(self) -> PtzCommand {
        match self {
            Self::Up => PtzCommand::Move(PtzVector::pan_tilt(0.0, STEP)),
            Self::Down => PtzCommand::Move(PtzVector::pan_tilt(0.0, -STEP)),
            Self::Left => PtzCommand::Move(PtzVector::pan_tilt(-STEP, 0.0)),
            Self::Right => PtzCommand::Move(PtzVector::pan_tilt(STEP, 0.0)),
            Self::Home => PtzCommand::Home,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
            Self::Home => "home",
        }
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "home" => Ok(Self::Home),
            other => Err(anyhow!("invalid direction '{}'", other)),
        }
    }
}

/// Control handle for one camera, bound to the media profile used for PTZ.
pub struct PtzSession {
    pub camera_name: String,
    pub control: Box<dyn DeviceControl>,
    pub profile_token: String,
}

impl PtzSession {
    pub fn execute(&self, direction: Direction) -> Result<()> {
        match direction.command() {
            PtzCommand::Move(vector) => self.control.relative_move(&self.profile_token, vector),
            PtzCommand::Home => self.control.goto_home(&self.profile_token),
        }
    }
}

impl std::fmt::Debug for PtzSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtzSession")
            .field("camera_name", &self.camera_name)
            .field("profile_token", &self.profile_token)
            .finish_non_exhaustive()
    }
}

/// Immutable camera-name -> session map.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: BTreeMap<String, PtzSession>,
}

impl SessionTable {
    pub fn new(sessions: impl IntoIterator<Item = PtzSession>) -> Self {
        Self {
            sessions: sessions
                .into_iter()
                .map(|session| (session.camera_name.clone(), session))
                .collect(),
        }
    }

    pub fn get(&self, camera_name: &str) -> Option<&PtzSession> {
        self.sessions.get(camera_name)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn camera_names(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }
}

/// Shared read handle over the session table.
///
/// Readers take an `Arc` snapshot; a refresh replaces the whole table.
#[derive(Clone, Debug, Default)]
pub struct SharedSessions {
    inner: Arc<RwLock<Arc<SessionTable>>>,
}

impl SharedSessions {
    pub fn new(table: SessionTable) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(table))),
        }
    }

    pub fn snapshot(&self) -> Arc<SessionTable> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn swap(&self, table: SessionTable) -> Arc<SessionTable> {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, Arc::new(table))
    }
}

/// A camera the gateway should hold a PTZ session for.
#[derive(Clone, Debug)]
pub struct PtzTarget {
    pub camera_name: String,
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
}

/// Opens one session per target, skipping targets that cannot be reached
/// or expose no media profile.
pub fn build_sessions(connector: &dyn DeviceConnector, targets: &[PtzTarget]) -> SessionTable {
    let mut sessions = Vec::new();
    for target in targets {
        match open_session(connector, target) {
            Ok(session) => {
                log::info!(
                    "ptz session ready: camera={} host={}:{} profile={}",
                    target.camera_name,
                    target.host,
                    target.port,
                    session.profile_token
                );
                sessions.push(session);
            }
            Err(err) => {
                log::warn!(
                    "ptz unavailable for camera={} host={}:{}: {:#}",
                    target.camera_name,
                    target.host,
                    target.port,
                    err
                );
            }
        }
    }
    SessionTable::new(sessions)
}

fn open_session(connector: &dyn DeviceConnector, target: &PtzTarget) -> Result<PtzSession> {
    let control = connector.connect(&target.host, target.port, &target.credentials)?;
    let profile = control
        .media_profiles()?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("device reports no media profiles"))?;
    Ok(PtzSession {
        camera_name: target.camera_name.clone(),
        control,
        profile_token: profile.token,
    })
}
