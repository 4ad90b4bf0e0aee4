use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use ewcs_core::charger::{ChargerEngine, ChargerField, RegisterGroup};
use ewcs_core::config::ChargerConfig;
use ewcs_core::protocol::{crc16_le_bytes, verify_trailer_le, DeviceError, ErrorKind};
use pretty_assertions::assert_eq;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Register image of a charger in daylight
fn register_map() -> HashMap<u16, u16> {
    let mut regs = HashMap::new();
    regs.insert(0x3100, 2600); // PV 26.00 V
    regs.insert(0x3101, 200); // 2.00 A
    regs.insert(0x3102, 0x1450); // 707.36 W, low word
    regs.insert(0x3103, 0x0001);
    regs.insert(0x310C, 1290);
    regs.insert(0x310D, 50);
    regs.insert(0x310E, 645);
    regs.insert(0x3110, (-250i16) as u16); // -2.50 °C
    regs.insert(0x3111, 3120);
    regs.insert(0x311A, 87);
    regs.insert(0x311D, 1200);
    regs.insert(0x3201, 0x0005);
    regs.insert(0x3312, 0x86A0); // 1000.00 kWh generated in total
    regs.insert(0x3313, 0x0001);
    regs.insert(0x331A, 1310);
    let current = (-150i32) as u32;
    regs.insert(0x331B, (current & 0xFFFF) as u16);
    regs.insert(0x331C, (current >> 16) as u16);
    regs
}

struct FakeCharger {
    regs: Arc<Mutex<HashMap<u16, u16>>>,
    silent: Arc<Mutex<HashSet<u16>>>,
}

impl FakeCharger {
    async fn run(self, mut io: DuplexStream) {
        let mut req = [0u8; 8];
        while io.read_exact(&mut req).await.is_ok() {
            assert!(verify_trailer_le(&req).is_ok(), "bad request CRC");
            assert_eq!(req[1], 0x04);
            let start = u16::from_be_bytes([req[2], req[3]]);
            let count = u16::from_be_bytes([req[4], req[5]]);
            if self.silent.lock().unwrap().contains(&start) {
                continue;
            }

            let mut reply = vec![req[0], 0x04, (count * 2) as u8];
            {
                let regs = self.regs.lock().unwrap();
                for addr in start..start + count {
                    reply.extend_from_slice(&regs.get(&addr).copied().unwrap_or(0).to_be_bytes());
                }
            }
            let crc = crc16_le_bytes(&reply);
            reply.extend_from_slice(&crc);

            // Trickle out the header separately from the body
            if io.write_all(&reply[..2]).await.is_err() {
                return;
            }
            tokio::task::yield_now().await;
            if io.write_all(&reply[2..]).await.is_err() {
                return;
            }
        }
    }
}

type Handles = (Arc<Mutex<HashMap<u16, u16>>>, Arc<Mutex<HashSet<u16>>>);

fn setup() -> (ChargerEngine<DuplexStream>, Handles) {
    setup_with(ChargerConfig::default())
}

fn setup_with(config: ChargerConfig) -> (ChargerEngine<DuplexStream>, Handles) {
    let (host, device) = duplex(4096);
    let regs = Arc::new(Mutex::new(register_map()));
    let silent = Arc::new(Mutex::new(HashSet::new()));
    let fake = FakeCharger {
        regs: regs.clone(),
        silent: silent.clone(),
    };
    tokio::spawn(fake.run(device));
    (ChargerEngine::new(host, config), (regs, silent))
}

#[tokio::test(start_paused = true)]
async fn test_poll_cycle_decodes_every_group() {
    let (mut engine, _) = setup();

    let report = engine.poll().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.updated, RegisterGroup::POLL_ORDER.to_vec());

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.value(ChargerField::PvVoltage), Some(26.0));
    assert_eq!(snapshot.value(ChargerField::PvCurrent), Some(2.0));
    assert_eq!(snapshot.value(ChargerField::PvPower), Some(707.36));
    assert_eq!(snapshot.value(ChargerField::LoadVoltage), Some(12.9));
    assert_eq!(snapshot.value(ChargerField::BatteryTemperature), Some(-2.5));
    assert_eq!(snapshot.value(ChargerField::DeviceTemperature), Some(31.2));
    assert_eq!(snapshot.value(ChargerField::BatterySoc), Some(87.0));
    assert_eq!(snapshot.value(ChargerField::BatteryRatedVoltage), Some(12.0));
    assert_eq!(snapshot.value(ChargerField::ChargingStatus), Some(5.0));
    assert_eq!(snapshot.value(ChargerField::GeneratedEnergyTotal), Some(1000.0));
    assert_eq!(snapshot.value(ChargerField::BatteryVoltage), Some(13.1));
    assert_eq!(snapshot.value(ChargerField::BatteryCurrent), Some(-1.5));
    assert_eq!(snapshot.len(), 23);
}

#[tokio::test(start_paused = true)]
async fn test_silent_group_keeps_previous_values() {
    let (mut engine, (regs, silent)) = setup();
    engine.poll().await.unwrap();
    let soc_before = *engine.snapshot().get(ChargerField::BatterySoc).unwrap();

    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    regs.lock().unwrap().insert(0x311A, 42);
    regs.lock().unwrap().insert(0x3100, 2700);
    silent.lock().unwrap().insert(0x311A);

    let report = engine.poll().await.unwrap();
    assert_eq!(report.failed, vec![(RegisterGroup::BatterySoc, ErrorKind::Timeout)]);
    assert_eq!(report.updated.len(), 7);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.get(ChargerField::BatterySoc), Some(&soc_before));
    assert_eq!(snapshot.value(ChargerField::PvVoltage), Some(27.0));
}

#[tokio::test(start_paused = true)]
async fn test_single_group_query() {
    let (mut engine, _) = setup();

    let block = engine.query(RegisterGroup::BatteryRealtime).await.unwrap();
    assert!(block.crc_valid);
    assert_eq!(block.start_address, 0x331A);
    assert_eq!(block.register_count, 3);
    assert_eq!(block.raw_bytes.len(), 3 + 6 + 2);
    assert_eq!(block.registers()[0], 1310);
}

#[tokio::test]
async fn test_closed_link_ends_cycle() {
    let (host, device) = duplex(64);
    drop(device);
    let mut engine = ChargerEngine::new(host, ChargerConfig::default());

    let err = engine.poll().await.unwrap_err();
    assert!(matches!(err, DeviceError::Transport(_)));
    assert!(engine.snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_receive_overflow_ends_cycle() {
    let config = ChargerConfig {
        max_buffered: 16,
        ..ChargerConfig::default()
    };
    let (mut engine, _) = setup_with(config);

    // The 41-byte ArrayData reply cannot fit
    let err = engine.poll().await.unwrap_err();
    assert!(matches!(err, DeviceError::BufferOverflow { limit: 16 }));
    assert_eq!(err.kind(), ErrorKind::TransportError);
    assert!(engine.snapshot().is_empty());
}
