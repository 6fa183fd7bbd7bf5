//! `entPhysicalTable`/`entPhySensorTable`: the chassis and
//! everything mounted in it (fan drawers, fans, PSUs, transceivers) plus each one's RFC
//! 3433-style sensor readings. Every physical entity's `sub_id` is derived purely from its
//! position in the containment hierarchy so it is stable across polls without needing a
//! persistent allocation table.

use crate::db::Namespaces;
use crate::error::Result;
use crate::mib::scheduler::Updater;
use crate::mib::{Column, Entry, IndexedCache};
use crate::oid::Oid;
use crate::value::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const ENT_PHYSICAL_TABLE: [u32; 10] = [1, 3, 6, 1, 2, 1, 47, 1, 1, 1];
pub const ENT_PHY_SENSOR_TABLE: [u32; 9] = [1, 3, 6, 1, 2, 1, 99, 1, 1];

fn physical_col(col: u32) -> Oid {
    let mut v = ENT_PHYSICAL_TABLE[..9].to_vec();
    v.push(col);
    Oid::new(v)
}

fn sensor_col(col: u32) -> Oid {
    let mut v = ENT_PHY_SENSOR_TABLE[..8].to_vec();
    v.push(col);
    Oid::new(v)
}

pub const MODULE_TYPE_MULTIPLE: u32 = 100_000_000;
pub const MODULE_INDEX_MULTIPLE: u32 = 1_000_000;
/// Ports don't share the module/device/sensor digit layout the rest of the chassis uses — an
/// ifindex can exceed what the 2-digit module-index field leaves room for, so a port's
/// `entPhysicalIndex` is its own flat 10-digit scheme: `1 · ifindex(7) · sensor · index`.
pub const MODULE_TYPE_PORT: u32 = 1_000_000_000;
pub const DEVICE_TYPE_MULTIPLE: u32 = 10_000;
pub const DEVICE_INDEX_MULTIPLE: u32 = 100;
pub const SENSOR_TYPE_MULTIPLE: u32 = 10;
pub const PORT_IFINDEX_MULTIPLE: u32 = 100;
pub const CHASSIS_SUB_ID: u32 = 1;
pub const CHASSIS_MGMT_SUB_ID: u32 = 2 * MODULE_TYPE_MULTIPLE;

pub mod module_type {
    pub const FAN_DRAWER: u32 = 5;
    pub const PSU: u32 = 6;
}

pub mod device_type {
    pub const PS: u32 = 1;
    pub const FAN: u32 = 2;
    pub const POWER_MONITOR: u32 = 24;
    pub const CHASSIS_THERMAL: u32 = 99;
}

pub mod sensor_type {
    pub const TEMPERATURE: u32 = 1;
    pub const FAN_TACH: u32 = 2;
    pub const POWER: u32 = 3;
    pub const CURRENT: u32 = 4;
    pub const VOLTAGE: u32 = 5;
    pub const OPTICAL_TX_POWER: u32 = 2;
    pub const OPTICAL_RX_POWER: u32 = 3;
    pub const OPTICAL_BIAS: u32 = 4;
}

pub fn get_fan_drawer_sub_id(drawer_index: u32) -> u32 {
    module_type::FAN_DRAWER * MODULE_TYPE_MULTIPLE + drawer_index * MODULE_INDEX_MULTIPLE
}

pub fn get_fan_sub_id(drawer_index: u32, fan_index: u32) -> u32 {
    get_fan_drawer_sub_id(drawer_index) + device_type::FAN * DEVICE_TYPE_MULTIPLE + fan_index * DEVICE_INDEX_MULTIPLE
}

pub fn get_fan_tachometers_sub_id(drawer_index: u32, fan_index: u32) -> u32 {
    get_fan_sub_id(drawer_index, fan_index) + sensor_type::FAN_TACH * SENSOR_TYPE_MULTIPLE
}

pub fn get_psu_sub_id(psu_index: u32) -> u32 {
    module_type::PSU * MODULE_TYPE_MULTIPLE + psu_index * MODULE_INDEX_MULTIPLE
}

pub fn get_psu_sensor_sub_id(psu_index: u32, sensor_type: u32) -> u32 {
    get_psu_sub_id(psu_index) + device_type::POWER_MONITOR * DEVICE_TYPE_MULTIPLE + sensor_type * SENSOR_TYPE_MULTIPLE
}

pub fn get_transceiver_sub_id(port_ifindex: u32) -> u32 {
    MODULE_TYPE_PORT + port_ifindex * PORT_IFINDEX_MULTIPLE
}

pub fn get_transceiver_sensor_sub_id(port_ifindex: u32, sensor_type: u32) -> u32 {
    get_transceiver_sub_id(port_ifindex) + sensor_type * SENSOR_TYPE_MULTIPLE
}

pub fn get_chassis_thermal_sub_id(position: u32) -> u32 {
    CHASSIS_MGMT_SUB_ID
        + device_type::CHASSIS_THERMAL * DEVICE_TYPE_MULTIPLE
        + position * DEVICE_INDEX_MULTIPLE
        + sensor_type::TEMPERATURE * SENSOR_TYPE_MULTIPLE
}

/// `entPhysicalClass` (RFC 6933).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalClass {
    Chassis = 3,
    Container = 5,
    PowerSupply = 6,
    Fan = 7,
    Port = 10,
}

#[derive(Debug, Clone)]
pub struct PhysicalEntity {
    pub sub_id: u32,
    pub descr: String,
    pub class: PhysicalClass,
    pub contained_in: u32,
    pub name: String,
    pub serial_num: String,
    pub is_fru: bool,
}

/// RFC 3433 `entPhySensorType`/`entPhySensorScale`/`entPhySensorPrecision` triple plus the
/// already-scaled reading and operational status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorUnit {
    Celsius,
    Volts,
    Amperes,
    Watts,
    Rpm,
    Dbm,
}

#[derive(Debug, Clone, Copy)]
pub struct SensorReading {
    pub unit: SensorUnit,
    pub value: f64,
    pub operational: bool,
}

const SENSOR_CLAMP: f64 = 1_000_000_000.0;

/// `entPhySensorPrecision` (RFC 3433): decimal digits to the right of the point the raw reading
/// is reported at. Temperature is reported `celsius/units/10⁻⁶`; optical power is reported
/// `watts/milli/10⁻⁴` after the dBm→mW conversion (both per the external sub-id/sensor contract).
pub fn sensor_precision(unit: SensorUnit) -> i32 {
    match unit {
        SensorUnit::Celsius => 6,
        SensorUnit::Dbm => 4,
        SensorUnit::Volts | SensorUnit::Amperes | SensorUnit::Watts => 3,
        SensorUnit::Rpm => 0,
    }
}

/// `entPhySensorType` (RFC 3433 enumeration). A dBm reading is reported as converted-to-watts,
/// so it shares the `watts` type code rather than getting one of its own.
pub fn sensor_type_code(unit: SensorUnit) -> i32 {
    match unit {
        SensorUnit::Celsius => 8,
        SensorUnit::Volts => 4,
        SensorUnit::Amperes => 5,
        SensorUnit::Watts | SensorUnit::Dbm => 6,
        SensorUnit::Rpm => 10,
    }
}

/// `entPhySensorScale`, one per unit kind rather than derived from precision: temperature and
/// tachometer readings are whole units (`units` = 9), everything else (including the converted
/// optical-power mW reading) is reported scaled down into `milli` (8).
pub fn sensor_scale_code(unit: SensorUnit) -> i32 {
    match unit {
        SensorUnit::Celsius | SensorUnit::Rpm => 9,
        SensorUnit::Volts | SensorUnit::Amperes | SensorUnit::Watts | SensorUnit::Dbm => 8,
    }
}

/// Converts a raw reading to the RFC 3433 `(value, precision)` pair clamped to the MIB's
/// representable range; optical power sensors additionally convert dBm to mW.
pub fn sensor_scaled_value(reading: &SensorReading) -> i32 {
    if !reading.operational {
        return 0;
    }
    let value = match reading.unit {
        SensorUnit::Dbm => dbm_to_mw(reading.value),
        _ => reading.value,
    };
    let precision = sensor_precision(reading.unit);
    let scaled = value * 10f64.powi(precision);
    let clamped = if scaled > SENSOR_CLAMP {
        SENSOR_CLAMP
    } else if scaled < -SENSOR_CLAMP {
        -SENSOR_CLAMP
    } else {
        scaled
    };
    clamped as i32
}

pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// A field that's absent entirely yields no reading at all (the sensor doesn't exist on this
/// platform). A field that's present but fails to parse is a `conversion_error`: report the
/// reading as `unavailable` with value `0` rather than dropping the row.
fn parsed_or_unavailable(raw: Option<&String>) -> Option<(f64, bool)> {
    raw.map(|v| match v.parse::<f64>() {
        Ok(n) => (n, true),
        Err(_) => (0.0, false),
    })
}

#[derive(Debug, Clone)]
pub struct SensorRow {
    pub sub_id: u32,
    pub reading: SensorReading,
}

pub struct PhysicalUpdater {
    db: Arc<Namespaces>,
    entity_cache: Arc<IndexedCache<PhysicalEntity>>,
    sensor_cache: Arc<IndexedCache<SensorRow>>,
}

impl PhysicalUpdater {
    pub fn new(
        db: Arc<Namespaces>,
        entity_cache: Arc<IndexedCache<PhysicalEntity>>,
        sensor_cache: Arc<IndexedCache<SensorRow>>,
    ) -> Self {
        PhysicalUpdater {
            db,
            entity_cache,
            sensor_cache,
        }
    }

    fn build_fan_drawers(
        &self,
        by_name: &mut HashMap<String, u32>,
        pending_parent: &mut Vec<(u32, String)>,
        sensors: &mut Vec<SensorRow>,
    ) -> Vec<PhysicalEntity> {
        let mut out = Vec::new();
        for key in self.db.keys("STATE_DB", "FAN_DRAWER_INFO|*") {
            let name = match key.strip_prefix("FAN_DRAWER_INFO|") {
                Some(n) => n.to_string(),
                None => continue,
            };
            let drawer_idx = match super::if_index::trailing_number(&name) {
                Some(n) => n,
                None => continue,
            };
            let fields = self.db.get_all("STATE_DB", &key);
            let sub_id = get_fan_drawer_sub_id(drawer_idx);
            by_name.insert(name.clone(), sub_id);
            pending_parent.push((sub_id, "chassis".to_string()));
            out.push(PhysicalEntity {
                sub_id,
                descr: fields.get("model").cloned().unwrap_or_else(|| name.clone()),
                class: PhysicalClass::Container,
                contained_in: CHASSIS_SUB_ID,
                name: name.clone(),
                serial_num: fields.get("serial").cloned().unwrap_or_default(),
                is_fru: fields.get("is_replaceable").map(|v| v == "true").unwrap_or(true),
            });

            for fan_key in self.db.keys("STATE_DB", &format!("FAN_INFO|{}*", name)) {
                let fan_name = fan_key.strip_prefix("FAN_INFO|").unwrap_or(&fan_key).to_string();
                let fan_idx = super::if_index::trailing_number(&fan_name).unwrap_or(0);
                let fan_fields = self.db.get_all("STATE_DB", &fan_key);
                let fan_sub_id = get_fan_sub_id(drawer_idx, fan_idx);
                out.push(PhysicalEntity {
                    sub_id: fan_sub_id,
                    descr: fan_name.clone(),
                    class: PhysicalClass::Fan,
                    contained_in: sub_id,
                    name: fan_name,
                    serial_num: String::new(),
                    is_fru: false,
                });
                if let Some((speed, operational)) = parsed_or_unavailable(fan_fields.get("speed")) {
                    sensors.push(SensorRow {
                        sub_id: get_fan_tachometers_sub_id(drawer_idx, fan_idx),
                        reading: SensorReading { unit: SensorUnit::Rpm, value: speed, operational },
                    });
                }
            }
        }
        out
    }

    fn build_psus(&self) -> (Vec<PhysicalEntity>, Vec<SensorRow>) {
        let mut entities = Vec::new();
        let mut sensors = Vec::new();
        for key in self.db.keys("STATE_DB", "PSU_INFO|*") {
            let name = match key.strip_prefix("PSU_INFO|") {
                Some(n) => n.to_string(),
                None => continue,
            };
            let idx = match super::if_index::trailing_number(&name) {
                Some(n) => n,
                None => continue,
            };
            let fields = self.db.get_all("STATE_DB", &key);
            let sub_id = get_psu_sub_id(idx);
            entities.push(PhysicalEntity {
                sub_id,
                descr: fields.get("model").cloned().unwrap_or_else(|| name.clone()),
                class: PhysicalClass::PowerSupply,
                contained_in: CHASSIS_SUB_ID,
                name: name.clone(),
                serial_num: fields.get("serial").cloned().unwrap_or_default(),
                is_fru: true,
            });
            if let Some((v, operational)) = parsed_or_unavailable(fields.get("output_voltage")) {
                sensors.push(SensorRow {
                    sub_id: get_psu_sensor_sub_id(idx, sensor_type::VOLTAGE),
                    reading: SensorReading { unit: SensorUnit::Volts, value: v, operational },
                });
            }
            if let Some((a, operational)) = parsed_or_unavailable(fields.get("output_current")) {
                sensors.push(SensorRow {
                    sub_id: get_psu_sensor_sub_id(idx, sensor_type::CURRENT),
                    reading: SensorReading { unit: SensorUnit::Amperes, value: a, operational },
                });
            }
            if let Some((w, operational)) = parsed_or_unavailable(fields.get("output_power")) {
                sensors.push(SensorRow {
                    sub_id: get_psu_sensor_sub_id(idx, sensor_type::POWER),
                    reading: SensorReading { unit: SensorUnit::Watts, value: w, operational },
                });
            }
        }
        (entities, sensors)
    }

    fn build_transceivers(&self) -> (Vec<PhysicalEntity>, Vec<SensorRow>) {
        let mut entities = Vec::new();
        let mut sensors = Vec::new();
        for key in self.db.keys("STATE_DB", "TRANSCEIVER_INFO|*") {
            let ifname = match key.strip_prefix("TRANSCEIVER_INFO|") {
                Some(n) => n.to_string(),
                None => continue,
            };
            let port_idx = match super::if_index::trailing_number(&ifname) {
                Some(n) => super::if_index::physical_port(n),
                None => continue,
            };
            let fields = self.db.get_all("STATE_DB", &key);
            let sub_id = get_transceiver_sub_id(port_idx);
            entities.push(PhysicalEntity {
                sub_id,
                descr: fields.get("model").cloned().unwrap_or_else(|| ifname.clone()),
                class: PhysicalClass::Port,
                contained_in: CHASSIS_SUB_ID,
                name: ifname.clone(),
                serial_num: fields.get("serial").cloned().unwrap_or_default(),
                is_fru: true,
            });

            let dom = self.db.get_all("STATE_DB", &format!("TRANSCEIVER_DOM_SENSOR|{}", ifname));
            if let Some((rx, operational)) = parsed_or_unavailable(dom.get("rx1power")) {
                sensors.push(SensorRow {
                    sub_id: get_transceiver_sensor_sub_id(port_idx, sensor_type::OPTICAL_RX_POWER),
                    reading: SensorReading { unit: SensorUnit::Dbm, value: rx, operational },
                });
            }
            if let Some((tx, operational)) = parsed_or_unavailable(dom.get("tx1power")) {
                sensors.push(SensorRow {
                    sub_id: get_transceiver_sensor_sub_id(port_idx, sensor_type::OPTICAL_TX_POWER),
                    reading: SensorReading { unit: SensorUnit::Dbm, value: tx, operational },
                });
            }
            if let Some((bias, operational)) = parsed_or_unavailable(dom.get("tx1bias")) {
                sensors.push(SensorRow {
                    sub_id: get_transceiver_sensor_sub_id(port_idx, sensor_type::OPTICAL_BIAS),
                    reading: SensorReading { unit: SensorUnit::Amperes, value: bias / 1000.0, operational },
                });
            }
            if let Some((temp, operational)) = parsed_or_unavailable(dom.get("temperature")) {
                sensors.push(SensorRow {
                    sub_id: get_transceiver_sensor_sub_id(port_idx, sensor_type::TEMPERATURE),
                    reading: SensorReading { unit: SensorUnit::Celsius, value: temp, operational },
                });
            }
        }
        (entities, sensors)
    }
}

impl Updater for PhysicalUpdater {
    fn name(&self) -> &str {
        "physical"
    }

    fn reinit(&self) -> Result<()> {
        Ok(())
    }

    fn update(&self) -> Result<()> {
        let mut by_name: HashMap<String, u32> = HashMap::new();
        let mut pending_parent: Vec<(u32, String)> = Vec::new();
        by_name.insert("chassis".to_string(), CHASSIS_SUB_ID);

        let mut entities: Vec<PhysicalEntity> = vec![PhysicalEntity {
            sub_id: CHASSIS_SUB_ID,
            descr: "chassis".to_string(),
            class: PhysicalClass::Chassis,
            contained_in: 0,
            name: "chassis".to_string(),
            serial_num: String::new(),
            is_fru: false,
        }];
        let mut sensors: Vec<SensorRow> = Vec::new();

        entities.extend(self.build_fan_drawers(&mut by_name, &mut pending_parent, &mut sensors));
        let (psu_entities, psu_sensors) = self.build_psus();
        entities.extend(psu_entities);
        sensors.extend(psu_sensors);
        let (xcvr_entities, xcvr_sensors) = self.build_transceivers();
        entities.extend(xcvr_entities);
        sensors.extend(xcvr_sensors);

        // Resolve any entity that referenced its parent by name before both existed: a parent
        // not found by the time every entity is built stays contained in the chassis rather
        // than left dangling.
        for (child_sub_id, parent_name) in pending_parent {
            let parent_sub_id = by_name.get(&parent_name).copied().unwrap_or(CHASSIS_SUB_ID);
            if let Some(e) = entities.iter_mut().find(|e| e.sub_id == child_sub_id) {
                e.contained_in = parent_sub_id;
            }
        }

        let entity_rows: BTreeMap<Vec<u32>, PhysicalEntity> =
            entities.into_iter().map(|e| (vec![e.sub_id], e)).collect();
        let sensor_rows: BTreeMap<Vec<u32>, SensorRow> =
            sensors.into_iter().map(|s| (vec![s.sub_id], s)).collect();

        self.entity_cache.publish(entity_rows);
        self.sensor_cache.publish(sensor_rows);
        Ok(())
    }
}

pub fn register(
    entity_cache: Arc<IndexedCache<PhysicalEntity>>,
    sensor_cache: Arc<IndexedCache<SensorRow>>,
) -> Vec<Entry> {
    vec![
        Entry::subtree(
            physical_col(2),
            Arc::new(Column::new(entity_cache.clone(), |e: &PhysicalEntity| Ok(Value::octet_string(e.descr.clone())))),
        ),
        Entry::subtree(
            physical_col(4),
            Arc::new(Column::new(entity_cache.clone(), |e: &PhysicalEntity| Ok(Value::Integer(e.contained_in as i32)))),
        ),
        Entry::subtree(
            physical_col(5),
            Arc::new(Column::new(entity_cache.clone(), |e: &PhysicalEntity| Ok(Value::Integer(e.class as i32)))),
        ),
        Entry::subtree(
            physical_col(7),
            Arc::new(Column::new(entity_cache.clone(), |e: &PhysicalEntity| Ok(Value::octet_string(e.name.clone())))),
        ),
        Entry::subtree(
            physical_col(11),
            Arc::new(Column::new(entity_cache.clone(), |e: &PhysicalEntity| Ok(Value::octet_string(e.serial_num.clone())))),
        ),
        Entry::subtree(
            physical_col(8),
            Arc::new(Column::new(entity_cache, |e: &PhysicalEntity| {
                Ok(Value::Integer(if e.is_fru { 1 } else { 2 }))
            })),
        ),
        Entry::subtree(
            sensor_col(1),
            Arc::new(Column::new(sensor_cache.clone(), |s: &SensorRow| {
                Ok(Value::Integer(sensor_type_code(s.reading.unit)))
            })),
        ),
        Entry::subtree(
            sensor_col(2),
            Arc::new(Column::new(sensor_cache.clone(), |s: &SensorRow| Ok(Value::Integer(sensor_scaled_value(&s.reading))))),
        ),
        Entry::subtree(
            sensor_col(3),
            Arc::new(Column::new(sensor_cache.clone(), |s: &SensorRow| {
                Ok(Value::Integer(sensor_precision(s.reading.unit)))
            })),
        ),
        Entry::subtree(
            sensor_col(4),
            Arc::new(Column::new(sensor_cache.clone(), |s: &SensorRow| {
                Ok(Value::Integer(sensor_scale_code(s.reading.unit)))
            })),
        ),
        Entry::subtree(
            sensor_col(5),
            Arc::new(Column::new(sensor_cache, |s: &SensorRow| {
                Ok(Value::Integer(if s.reading.operational { 1 } else { 2 }))
            })),
        ),
    ]
}
