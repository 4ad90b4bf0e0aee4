//! Charger telemetry snapshot
//!
//! Last known value of every decoded field. A failed poll leaves the
//! previous value and its timestamp in place.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Named charger quantities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargerField {
    /// PV array voltage
    PvVoltage,
    /// PV array current
    PvCurrent,
    /// PV array power
    PvPower,
    /// Load voltage
    LoadVoltage,
    /// Load current
    LoadCurrent,
    /// Load power
    LoadPower,
    /// Battery temperature
    BatteryTemperature,
    /// Controller temperature
    DeviceTemperature,
    /// Battery state of charge
    BatterySoc,
    /// Battery system rated voltage
    BatteryRatedVoltage,
    /// Raw battery status word
    BatteryStatus,
    /// Raw charging equipment status word
    ChargingStatus,
    /// Raw discharging equipment status word
    DischargingStatus,
    /// Energy consumed today
    ConsumedEnergyToday,
    /// Energy consumed this month
    ConsumedEnergyMonth,
    /// Energy consumed this year
    ConsumedEnergyYear,
    /// Energy consumed since install
    ConsumedEnergyTotal,
    /// Energy generated today
    GeneratedEnergyToday,
    /// Energy generated this month
    GeneratedEnergyMonth,
    /// Energy generated this year
    GeneratedEnergyYear,
    /// Energy generated since install
    GeneratedEnergyTotal,
    /// Battery voltage
    BatteryVoltage,
    /// Battery current (negative when discharging)
    BatteryCurrent,
}

impl ChargerField {
    /// Physical unit of the scaled value (empty for flags)
    pub fn unit(&self) -> &'static str {
        use ChargerField::*;
        match self {
            PvVoltage | LoadVoltage | BatteryRatedVoltage | BatteryVoltage => "V",
            PvCurrent | LoadCurrent | BatteryCurrent => "A",
            PvPower | LoadPower => "W",
            BatteryTemperature | DeviceTemperature => "°C",
            BatterySoc => "%",
            BatteryStatus | ChargingStatus | DischargingStatus => "",
            ConsumedEnergyToday | ConsumedEnergyMonth | ConsumedEnergyYear
            | ConsumedEnergyTotal | GeneratedEnergyToday | GeneratedEnergyMonth
            | GeneratedEnergyYear | GeneratedEnergyTotal => "kWh",
        }
    }
}

/// One field's last known value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Scaled value
    pub value: f64,
    /// When it was read
    pub updated_at: DateTime<Utc>,
}

/// Long-lived view of the charger, updated field by field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargerSnapshot {
    readings: BTreeMap<ChargerField, Reading>,
}

impl ChargerSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `field`
    pub fn update(&mut self, field: ChargerField, value: f64, at: DateTime<Utc>) {
        self.readings.insert(field, Reading { value, updated_at: at });
    }

    /// Record a batch of decoded values with a shared timestamp
    pub fn apply(&mut self, values: &[(ChargerField, f64)], at: DateTime<Utc>) {
        for &(field, value) in values {
            self.update(field, value, at);
        }
    }

    /// Last reading of `field`
    pub fn get(&self, field: ChargerField) -> Option<&Reading> {
        self.readings.get(&field)
    }

    /// Last value of `field`
    pub fn value(&self, field: ChargerField) -> Option<f64> {
        self.get(field).map(|r| r.value)
    }

    /// All readings in field order
    pub fn iter(&self) -> impl Iterator<Item = (&ChargerField, &Reading)> {
        self.readings.iter()
    }

    /// Number of fields ever read
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Check if nothing has been read yet
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}
