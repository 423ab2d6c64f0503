use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineStatus {
    Available,
    InUse,
    Error,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Available => "available",
            MachineStatus::InUse => "in_use",
            MachineStatus::Error => "error",
        }
    }
}

/// One machine at one request time. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MachineRecord {
    pub location_id: String,
    pub location_name: String,
    pub sitecode: String,
    pub uln: String,
    pub state_code: String,
    pub room_id: String,
    pub room_name: String,
    pub id: String,
    pub machine_number: String,
    pub start_time: Option<String>,
    pub time_remaining: i64,
    #[serde(rename = "type")]
    pub machine_type: String,
    pub request_time: String,
    pub status_raw: Option<String>,
    pub status: MachineStatus,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: String,
    pub room_name: String,
    pub id: String,
}

/// The static part of a location payload that every row repeats.
#[derive(Debug, Clone)]
pub struct LocationInfo {
    pub location_id: String,
    pub location_name: String,
    pub sitecode: String,
    pub uln: String,
    pub state_code: String,
    pub rooms: HashMap<String, Room>,
}

fn request_time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"-(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{4}Z)\.json$").expect("static regex")
    })
}

/// `{uln}-{request_time}.json` -> `request_time`.
pub fn extract_request_time(file_name: &str) -> Option<&str> {
    request_time_pattern()
        .captures(file_name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// First two characters of the ULN, or empty for shorter ULNs.
pub fn state_code(uln: &str) -> String {
    if uln.chars().count() >= 2 {
        uln.chars().take(2).collect()
    } else {
        String::new()
    }
}

/// Renders scalar JSON values the way they should appear in a CSV cell.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn integer(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl LocationInfo {
    pub fn from_payload(payload: &Value) -> Result<Self, String> {
        let location = payload
            .get("location")
            .ok_or_else(|| "missing key 'location'".to_string())?;

        let field = |key: &str| {
            text(location.get(key)).ok_or_else(|| format!("missing key 'location.{key}'"))
        };

        let uln = field("uln")?.trim().to_string();

        let mut rooms = HashMap::new();
        if let Some(list) = payload.get("rooms").and_then(Value::as_array) {
            for room in list {
                let Some(room_id) = text(room.get("room_id")) else {
                    continue;
                };
                rooms.insert(
                    room_id.clone(),
                    Room {
                        room_id,
                        room_name: text(room.get("room_name")).unwrap_or_default(),
                        id: text(room.get("id")).unwrap_or_default(),
                    },
                );
            }
        }

        Ok(Self {
            location_id: field("location_id")?,
            location_name: field("location_name")?,
            sitecode: field("sitecode")?,
            state_code: state_code(&uln),
            uln,
            rooms,
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw.trim()).ok()
}

/// Derives the machine state at `request_time`:
/// raw `ERROR` is an error; no time remaining, or no start time, is
/// available; otherwise the machine is in use until `time_remaining` whole
/// minutes have elapsed since it started.
pub fn calculate_status(
    status_raw: Option<&str>,
    time_remaining: i64,
    start_time: Option<&str>,
    request_time: &str,
) -> MachineStatus {
    if status_raw == Some("ERROR") {
        return MachineStatus::Error;
    }

    if time_remaining == 0 {
        return MachineStatus::Available;
    }

    let Some(start_time) = start_time.filter(|s| !s.is_empty()) else {
        return MachineStatus::Available;
    };

    let (Some(requested), Some(started)) = (parse_timestamp(request_time), parse_timestamp(start_time))
    else {
        tracing::warn!(start_time, request_time, "Could not parse machine timestamps");
        return MachineStatus::Available;
    };

    let elapsed_minutes = (requested - started).num_seconds().div_euclid(60);
    if elapsed_minutes > time_remaining {
        MachineStatus::Available
    } else {
        MachineStatus::InUse
    }
}

/// Turns one status payload into rows. Rooms the location payload does not
/// know about are skipped.
pub fn records_from_status(
    location: &LocationInfo,
    status: &Value,
    request_time: &str,
) -> Vec<MachineRecord> {
    let mut records = Vec::new();

    let Some(rooms) = status.get("data").and_then(Value::as_object) else {
        return records;
    };

    for (room_id, room_data) in rooms {
        let Some(room) = location.rooms.get(room_id) else {
            tracing::warn!(room_id = %room_id, uln = %location.uln, "Room not found in location data");
            continue;
        };

        let machines = room_data
            .get("machines")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for machine in machines {
            let status_raw = text(machine.get("status"));
            let start_time = text(machine.get("start_time"));

            let Some(time_remaining) = integer(machine.get("time_remaining")) else {
                tracing::warn!(room_id = %room_id, uln = %location.uln, "Machine without time_remaining");
                continue;
            };

            let status = calculate_status(
                status_raw.as_deref(),
                time_remaining,
                start_time.as_deref(),
                request_time,
            );

            records.push(MachineRecord {
                location_id: location.location_id.clone(),
                location_name: location.location_name.clone(),
                sitecode: location.sitecode.clone(),
                uln: location.uln.clone(),
                state_code: location.state_code.clone(),
                room_id: room.room_id.clone(),
                room_name: room.room_name.clone(),
                id: room.id.clone(),
                machine_number: text(machine.get("machine_number")).unwrap_or_default(),
                start_time,
                time_remaining,
                machine_type: text(machine.get("type")).unwrap_or_default(),
                request_time: request_time.to_string(),
                status_raw,
                status,
            });
        }
    }

    records
}

/// Integer ids sort numerically ahead of everything else, which sorts as
/// plain text. Ties on the number fall back to the text so `1` and `01`
/// stay distinct.
fn id_key(id: &str) -> (bool, u64, &str) {
    match id.parse::<u64>() {
        Ok(n) => (false, n, id),
        Err(_) => (true, 0, id),
    }
}

fn cmp_ids(a: &str, b: &str) -> Ordering {
    id_key(a).cmp(&id_key(b))
}

pub fn sort_records(records: &mut [MachineRecord]) {
    records.sort_by(|a, b| {
        a.request_time
            .cmp(&b.request_time)
            .then_with(|| cmp_ids(&a.room_id, &b.room_id))
            .then_with(|| cmp_ids(&a.machine_number, &b.machine_number))
    });
}
