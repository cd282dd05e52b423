//! JSON payloads carried in the `data` field and the shapes of API replies.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// `data` for `/home/device_list`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceListRequest {
    #[serde(rename = "getVirtualModel")]
    pub get_virtual_model: bool,
    #[serde(rename = "getHuamiDevices")]
    pub get_huami_devices: u8,
}

impl Default for DeviceListRequest {
    fn default() -> Self {
        Self {
            get_virtual_model: false,
            get_huami_devices: 0,
        }
    }
}

/// Service/property address within a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyRef {
    pub siid: u32,
    pub piid: u32,
}

impl PropertyRef {
    pub fn new(siid: u32, piid: u32) -> Self {
        Self { siid, piid }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyQuery {
    pub did: String,
    pub siid: u32,
    pub piid: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertyWrite {
    pub did: String,
    pub siid: u32,
    pub piid: u32,
    pub value: Value,
}

/// `data` for `/miotspec/prop/get` and `/miotspec/prop/set`.
#[derive(Debug, Clone, Serialize)]
pub struct PropertyRequest<P> {
    pub datasource: u8,
    pub params: Vec<P>,
}

impl<P> PropertyRequest<P> {
    pub fn new(params: Vec<P>) -> Self {
        Self {
            datasource: 1,
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionParams {
    pub did: String,
    pub siid: u32,
    pub aiid: u32,
    #[serde(rename = "in")]
    pub input: Vec<Value>,
    pub out: Vec<Value>,
}

/// `data` for `/miotspec/action`.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRequest {
    pub params: ActionParams,
}

/// Device entry from `/home/device_list`. Unknown fields are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Device {
    pub did: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub token: String,
    #[serde(default, rename = "localip")]
    pub local_ip: Option<String>,
    #[serde(default, rename = "isOnline", deserialize_with = "null_as_default")]
    pub is_online: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceList {
    #[serde(default, deserialize_with = "null_as_default")]
    pub list: Vec<Device>,
}

/// Device records routinely carry explicit `null`s; read those as the default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One entry of a property get/set reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PropertyResult {
    #[serde(default)]
    pub did: String,
    #[serde(default)]
    pub siid: u32,
    #[serde(default)]
    pub piid: u32,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub value: Option<Value>,
}

impl PropertyResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ActionResult {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub out: Vec<Value>,
}

/// Outer reply of every device API call.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

/// Caller names for a batch of properties, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMapping {
    entries: Vec<(String, PropertyRef)>,
}

impl PropertyMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, property: PropertyRef) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = property,
            None => self.entries.push((name, property)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, property: PropertyRef) -> Self {
        self.insert(name, property);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyRef)> {
        self.entries.iter().map(|(n, p)| (n.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maps each successful result back to the name it was requested under.
    pub fn resolve(&self, results: &[PropertyResult]) -> HashMap<String, Value> {
        let mut values = HashMap::new();
        for (name, property) in &self.entries {
            let hit = results
                .iter()
                .find(|r| r.siid == property.siid && r.piid == property.piid && r.is_ok());
            if let Some(value) = hit.and_then(|r| r.value.clone()) {
                values.insert(name.clone(), value);
            }
        }
        values
    }
}

impl<S: Into<String>> FromIterator<(S, PropertyRef)> for PropertyMapping {
    fn from_iter<I: IntoIterator<Item = (S, PropertyRef)>>(iter: I) -> Self {
        let mut mapping = Self::new();
        for (name, property) in iter {
            mapping.insert(name, property);
        }
        mapping
    }
}
