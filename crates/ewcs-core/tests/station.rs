use std::sync::{Arc, Mutex};

use ewcs_core::camera::wire::{self, READY_SIGNAL_LEN, READY_SIZE_OFFSET};
use ewcs_core::camera::{CaptureRecord, CaptureState, DirectoryStore};
use ewcs_core::config::StationConfig;
use ewcs_core::pic24::commands::ACK;
use ewcs_core::pic24::{Frame, FrameReceiver, SchedulePayload, ScheduleTarget};
use ewcs_core::protocol::{BoxedLink, DeviceError, ErrorKind};
use ewcs_core::station::{CaptureRecorder, FailureResponse, Station};
use pretty_assertions::assert_eq;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Acknowledges every frame it receives
async fn ack_everything(mut io: DuplexStream) {
    let mut rx = FrameReceiver::new();
    let mut buf = [0u8; 256];
    loop {
        let n = match io.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        for frame in rx.feed(&buf[..n]) {
            let Ok(reply) = Frame::new(frame.seq, ACK, Vec::new()) else {
                return;
            };
            if io.write_all(&reply.to_bytes()).await.is_err() {
                return;
            }
        }
    }
}

/// Serves one fixed image to snapshot and packet commands
async fn serve_image(mut io: DuplexStream, image: Vec<u8>) {
    let mut cmd = [0u8; 12];
    while io.read_exact(&mut cmd).await.is_ok() {
        let reply = match cmd[3] {
            wire::CMD_SNAPSHOT => {
                let mut frame = vec![0u8; READY_SIGNAL_LEN];
                frame[..4].copy_from_slice(&[0x90, 0xEB, 0x01, wire::CMD_SNAPSHOT]);
                frame[READY_SIZE_OFFSET..READY_SIZE_OFFSET + 4]
                    .copy_from_slice(&(image.len() as u32).to_le_bytes());
                frame
            }
            wire::CMD_READ_PACKET => {
                let start = u32::from_le_bytes([cmd[6], cmd[7], cmd[8], cmd[9]]) as usize;
                let size = u16::from_le_bytes([cmd[10], cmd[11]]);
                let mut frame = wire::PACKET_MARKER.to_vec();
                frame.extend_from_slice(&size.to_le_bytes());
                frame.extend_from_slice(&[0x00, 0x00]);
                frame.extend_from_slice(&image[start..start + size as usize]);
                frame
            }
            _ => continue,
        };
        if io.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn station_with_pic24() -> Station {
    let (host, device) = duplex(1024);
    tokio::spawn(ack_everything(device));
    let link: BoxedLink = Box::new(host);
    Station::new(StationConfig::default()).with_pic24(link)
}

#[derive(Default)]
struct MemoryRecorder {
    rows: Mutex<Vec<CaptureRecord>>,
}

impl CaptureRecorder for MemoryRecorder {
    fn record(&self, record: &CaptureRecord) -> Result<(), DeviceError> {
        self.rows.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_missing_device_reports_transport_error() {
    let station = Station::new(StationConfig::default())
        .with_recorder(Arc::new(MemoryRecorder::default()));

    let err = station.capture_image().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TransportError);
    assert!(err.message.contains("camera"));

    let err = station.poll_charger().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TransportError);

    let err = station.reset_controller().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::TransportError);
}

#[tokio::test]
async fn test_invalid_channel_is_invalid_argument() {
    let station = station_with_pic24();

    let err = station.set_output(0, true).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);

    station.set_output(4, true).await.unwrap();
}

#[tokio::test]
async fn test_written_schedule_is_remembered() {
    let station = station_with_pic24();
    let payload = SchedulePayload::Command("ON 10 OFF 40".into());

    station
        .set_schedule(ScheduleTarget::OnOff, payload.clone())
        .await
        .unwrap();

    let status = station.status();
    assert!(status.pic24_connected);
    assert_eq!(status.schedules.on_off, Some(payload));
    assert_eq!(status.schedules.satellite, None);
    assert!(!status.camera_busy);
    assert_eq!(status.camera_state, None);
}

#[tokio::test]
async fn test_oversize_schedule_rejected() {
    let station = station_with_pic24();
    let payload = SchedulePayload::Command("x".repeat(64));

    let err = station
        .set_schedule(ScheduleTarget::Satellite, payload)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);
    assert_eq!(station.schedules().satellite, None);
}

#[test]
fn test_failure_response_serialization() {
    let failure = FailureResponse::from(DeviceError::CrcMismatch {
        expected: 0x1234,
        actual: 0x4321,
    });
    let json = serde_json::to_value(&failure).unwrap();
    assert_eq!(json["kind"], "crc_mismatch");
    assert!(json["message"].as_str().unwrap().contains("0x1234"));

    let failure = FailureResponse::from(DeviceError::Nack { cmd: 0x06 });
    assert_eq!(failure.kind, ErrorKind::DeviceRejected);
}

#[tokio::test]
async fn test_capture_is_recorded_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (host, device) = duplex(64 * 1024);
    tokio::spawn(serve_image(device, vec![0x5A; 1000]));
    let recorder = Arc::new(MemoryRecorder::default());
    let link: BoxedLink = Box::new(host);
    let station = Station::new(StationConfig::default())
        .with_camera(link, Arc::new(DirectoryStore::new(dir.path())))
        .unwrap()
        .with_recorder(recorder.clone());

    let record = station.capture_image().await.unwrap();
    assert_eq!(record.size, 1000);

    let rows = recorder.rows.lock().unwrap().clone();
    assert_eq!(rows, vec![record.clone()]);
    assert!(dir.path().join(&record.filename).exists());

    let status = station.status();
    assert_eq!(status.last_capture, Some(record));
    assert!(!status.camera_busy);
    assert_eq!(status.camera_state, Some(CaptureState::Idle));
}

#[test]
fn test_unusable_camera_config_rejected() {
    let (host, _device) = duplex(64);
    let link: BoxedLink = Box::new(host);
    let mut config = StationConfig::default();
    config.camera.max_buffered = 100;

    let result = Station::new(config).with_camera(link, Arc::new(DirectoryStore::new("unused")));
    assert!(matches!(result, Err(DeviceError::InvalidArgument(_))));
}
