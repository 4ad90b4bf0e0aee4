//! Station facade
//!
//! Owns the three device engines and exposes their operations and state to
//! the HTTP layer as plain data. Engine errors leave here only as
//! [`FailureResponse`] values carrying the stable [`ErrorKind`] taxonomy.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::camera::{CameraEngine, CaptureRecord, CaptureState, DirectoryStore, ImageStore};
use crate::charger::{ChargerEngine, ChargerSnapshot, PollReport};
use crate::config::StationConfig;
use crate::pic24::{Pic24Engine, SchedulePayload, ScheduleTarget};
use crate::protocol::{open_link, BoxedLink, DeviceError, ErrorKind};

/// Structured failure handed to API clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureResponse {
    /// Error class
    pub kind: ErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl From<DeviceError> for FailureResponse {
    fn from(err: DeviceError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

fn not_attached(device: &str) -> FailureResponse {
    FailureResponse {
        kind: ErrorKind::TransportError,
        message: format!("{} is not attached", device),
    }
}

/// Persistence boundary for completed captures
pub trait CaptureRecorder: Send + Sync {
    /// Store the `{timestamp, filename}` row for a capture
    fn record(&self, record: &CaptureRecord) -> Result<(), DeviceError>;
}

/// Last schedules written to or read from the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduleState {
    /// Peripheral on/off schedule
    pub on_off: Option<SchedulePayload>,
    /// Satellite uplink schedule
    pub satellite: Option<SchedulePayload>,
}

impl ScheduleState {
    fn set(&mut self, target: ScheduleTarget, payload: SchedulePayload) {
        match target {
            ScheduleTarget::OnOff => self.on_off = Some(payload),
            ScheduleTarget::Satellite => self.satellite = Some(payload),
        }
    }
}

/// Everything the HTTP layer shows about the station
#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    /// Configured station name
    pub station_name: String,
    /// Whether the PIC24 link is up
    pub pic24_connected: bool,
    /// A capture currently holds the camera
    pub camera_busy: bool,
    /// Camera session state, if a camera is attached and idle enough to ask
    pub camera_state: Option<CaptureState>,
    /// Most recent completed capture
    pub last_capture: Option<CaptureRecord>,
    /// Charger readings
    pub charger: ChargerSnapshot,
    /// Known schedules
    pub schedules: ScheduleState,
}

/// Telemetry/control facade over the station's serial devices
pub struct Station {
    config: StationConfig,
    pic24: Option<Pic24Engine<BoxedLink>>,
    camera: Option<Mutex<CameraEngine<BoxedLink>>>,
    charger: Option<Mutex<ChargerEngine<BoxedLink>>>,
    recorder: Option<Arc<dyn CaptureRecorder>>,
    schedules: RwLock<ScheduleState>,
    charger_snapshot: RwLock<ChargerSnapshot>,
    last_capture: RwLock<Option<CaptureRecord>>,
}

impl Station {
    /// Create a station with no devices attached
    pub fn new(config: StationConfig) -> Self {
        Self {
            config,
            pic24: None,
            camera: None,
            charger: None,
            recorder: None,
            schedules: RwLock::new(ScheduleState::default()),
            charger_snapshot: RwLock::new(ChargerSnapshot::new()),
            last_capture: RwLock::new(None),
        }
    }

    /// Open every configured serial port and attach its engine.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: StationConfig) -> Result<Self, DeviceError> {
        config.validate()?;
        let pic24 = open_link(&config.pic24.port)?;
        let camera = open_link(&config.camera.port)?;
        let charger = open_link(&config.charger.port)?;
        let store = Arc::new(DirectoryStore::new(&config.image_dir));
        Ok(Self::new(config)
            .with_pic24(pic24)
            .with_camera(camera, store)?
            .with_charger(charger))
    }

    /// Attach the PIC24 controller link
    pub fn with_pic24(mut self, link: BoxedLink) -> Self {
        self.pic24 = Some(Pic24Engine::spawn(link, self.config.pic24.clone()));
        self
    }

    /// Attach the camera link and the store for its images
    pub fn with_camera(
        mut self,
        link: BoxedLink,
        store: Arc<dyn ImageStore>,
    ) -> Result<Self, DeviceError> {
        let engine = CameraEngine::new(link, self.config.camera.clone(), store)?;
        self.camera = Some(Mutex::new(engine));
        Ok(self)
    }

    /// Attach the charger link
    pub fn with_charger(mut self, link: BoxedLink) -> Self {
        self.charger = Some(Mutex::new(ChargerEngine::new(link, self.config.charger.clone())));
        self
    }

    /// Forward completed captures to `recorder`
    pub fn with_recorder(mut self, recorder: Arc<dyn CaptureRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    fn pic24(&self) -> Result<&Pic24Engine<BoxedLink>, FailureResponse> {
        self.pic24.as_ref().ok_or_else(|| not_attached("PIC24 controller"))
    }

    /// Reset the controller
    pub async fn reset_controller(&self) -> Result<(), FailureResponse> {
        Ok(self.pic24()?.reset().await?)
    }

    /// Switch output `channel` on or off
    pub async fn set_output(&self, channel: u8, on: bool) -> Result<(), FailureResponse> {
        Ok(self.pic24()?.set_output(channel, on).await?)
    }

    /// Fetch synchronized time data from the controller
    pub async fn request_sync_data(&self) -> Result<Vec<u8>, FailureResponse> {
        Ok(self.pic24()?.request_sync_data().await?)
    }

    /// Enable or disable power-save mode
    pub async fn set_power_save(&self, enabled: bool) -> Result<(), FailureResponse> {
        Ok(self.pic24()?.set_power_save(enabled).await?)
    }

    /// Start a satellite transmission
    pub async fn start_satellite_tx(&self) -> Result<(), FailureResponse> {
        Ok(self.pic24()?.start_satellite_tx().await?)
    }

    /// Write a schedule and remember it
    pub async fn set_schedule(
        &self,
        target: ScheduleTarget,
        payload: SchedulePayload,
    ) -> Result<(), FailureResponse> {
        self.pic24()?.set_schedule(target, &payload).await?;
        if let Ok(mut schedules) = self.schedules.write() {
            schedules.set(target, payload);
        }
        Ok(())
    }

    /// Read a schedule from the controller and remember it
    pub async fn get_schedule(
        &self,
        target: ScheduleTarget,
    ) -> Result<SchedulePayload, FailureResponse> {
        let payload = self.pic24()?.get_schedule(target).await?;
        if let Ok(mut schedules) = self.schedules.write() {
            schedules.set(target, payload.clone());
        }
        Ok(payload)
    }

    /// Capture an image and hand its record to persistence
    pub async fn capture_image(&self) -> Result<CaptureRecord, FailureResponse> {
        let camera = self.camera.as_ref().ok_or_else(|| not_attached("camera"))?;
        let record = camera.lock().await.capture().await?;
        tracing::info!(filename = %record.filename, size = record.size, "capture complete");

        if let Some(recorder) = &self.recorder {
            recorder.record(&record)?;
        }
        if let Ok(mut last) = self.last_capture.write() {
            *last = Some(record.clone());
        }
        Ok(record)
    }

    /// Abandon any camera transfer in progress
    pub async fn reset_capture_state(&self) -> Result<(), FailureResponse> {
        let camera = self.camera.as_ref().ok_or_else(|| not_attached("camera"))?;
        camera.lock().await.reset_capture_state();
        Ok(())
    }

    /// Run one charger poll cycle and publish the refreshed snapshot
    pub async fn poll_charger(&self) -> Result<PollReport, FailureResponse> {
        let charger = self.charger.as_ref().ok_or_else(|| not_attached("charger"))?;
        let mut engine = charger.lock().await;
        let result = engine.poll().await;
        if let Ok(mut snapshot) = self.charger_snapshot.write() {
            *snapshot = engine.snapshot().clone();
        }
        Ok(result?)
    }

    /// Latest charger readings
    pub fn charger_snapshot(&self) -> ChargerSnapshot {
        self.charger_snapshot
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Known schedules
    pub fn schedules(&self) -> ScheduleState {
        self.schedules.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Snapshot of everything the API exposes
    pub fn status(&self) -> StationStatus {
        let (camera_busy, camera_state) = match &self.camera {
            Some(camera) => match camera.try_lock() {
                Ok(engine) => (false, Some(engine.session().state())),
                Err(_) => (true, None),
            },
            None => (false, None),
        };
        StationStatus {
            station_name: self.config.station_name.clone(),
            pic24_connected: self.pic24.as_ref().map(|p| p.is_connected()).unwrap_or(false),
            camera_busy,
            camera_state,
            last_capture: self.last_capture.read().ok().and_then(|l| l.clone()),
            charger: self.charger_snapshot(),
            schedules: self.schedules(),
        }
    }
}
