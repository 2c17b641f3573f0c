//! Dynamic access to reply and signal bodies.
//!
//! Manager replies are read positionally, and most of them wrap interesting
//! values in variants or dictionaries. [`Args`] keeps the body as a list of
//! owned values and lets backends pull typed fields out of it, unwrapping
//! variants transparently.

use std::collections::HashMap;
use zbus::message::Message;
use zvariant::{OwnedValue, Structure, Value};

use crate::Result;
use crate::api::models::ConnlineError;

/// Positional arguments of a reply, signal or incoming method call.
#[derive(Debug, Default)]
pub(crate) struct Args(Vec<OwnedValue>);

/// String-keyed dictionary (`a{sv}`) taken out of an argument list.
#[derive(Debug, Default)]
pub(crate) struct Dict(HashMap<String, OwnedValue>);

/// Conversion from a (possibly variant-wrapped) D-Bus value.
pub(crate) trait FromArg: Sized {
    fn from_arg(value: &Value<'_>) -> Result<Self>;
}

/// Strips any number of `v` wrappers.
fn peel<'a, 'v>(value: &'a Value<'v>) -> &'a Value<'v> {
    match value {
        Value::Value(inner) => peel(inner),
        other => other,
    }
}

fn mismatch(expected: &str, value: &Value<'_>) -> ConnlineError {
    ConnlineError::MalformedReply(format!(
        "expected {expected}, got {}",
        value.value_signature()
    ))
}

impl FromArg for u32 {
    fn from_arg(value: &Value<'_>) -> Result<Self> {
        match peel(value) {
            Value::U32(v) => Ok(*v),
            other => Err(mismatch("u", other)),
        }
    }
}

impl FromArg for bool {
    fn from_arg(value: &Value<'_>) -> Result<Self> {
        match peel(value) {
            Value::Bool(v) => Ok(*v),
            other => Err(mismatch("b", other)),
        }
    }
}

impl FromArg for String {
    fn from_arg(value: &Value<'_>) -> Result<Self> {
        match peel(value) {
            Value::Str(s) => Ok(s.as_str().to_owned()),
            Value::ObjectPath(p) => Ok(p.as_str().to_owned()),
            other => Err(mismatch("s or o", other)),
        }
    }
}

impl<T: FromArg> FromArg for Vec<T> {
    fn from_arg(value: &Value<'_>) -> Result<Self> {
        match peel(value) {
            Value::Array(arr) => arr.iter().map(T::from_arg).collect(),
            other => Err(mismatch("an array", other)),
        }
    }
}

impl FromArg for Dict {
    fn from_arg(value: &Value<'_>) -> Result<Self> {
        match peel(value) {
            Value::Dict(dict) => Ok(Dict(HashMap::<String, OwnedValue>::try_from(
                dict.try_clone()?,
            )?)),
            other => Err(mismatch("a{sv}", other)),
        }
    }
}

impl Args {
    pub(crate) fn new(values: Vec<OwnedValue>) -> Self {
        Self(values)
    }

    /// Reads the body of `msg`.
    ///
    /// Every body is read as a structure so that single- and multi-argument
    /// bodies end up as the same positional list.
    pub(crate) fn from_message(msg: &Message) -> Result<Self> {
        if msg.header().signature().to_string().is_empty() {
            return Ok(Self::default());
        }

        let body = msg.body();
        let structure: Structure<'_> = body.deserialize()?;
        let values = structure
            .into_fields()
            .into_iter()
            .map(OwnedValue::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self(values))
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    fn value(&self, idx: usize) -> Result<&Value<'static>> {
        self.0.get(idx).map(|v| &**v).ok_or_else(|| {
            ConnlineError::MalformedReply(format!(
                "missing argument {idx} (got {})",
                self.len()
            ))
        })
    }

    /// Typed argument at `idx`.
    pub(crate) fn get<T: FromArg>(&self, idx: usize) -> Result<T> {
        T::from_arg(self.value(idx)?)
    }

    /// Dictionary argument at `idx`.
    pub(crate) fn dict(&self, idx: usize) -> Result<Dict> {
        self.get(idx)
    }

    /// Expands a lone structure argument into its fields.
    ///
    /// Some managers answer with one `(…)` value where others would send
    /// the same fields as separate arguments.
    pub(crate) fn untuple(self) -> Result<Self> {
        if self.0.len() != 1 {
            return Ok(self);
        }
        match peel(&self.0[0]) {
            Value::Structure(s) => {
                let fields = s
                    .fields()
                    .iter()
                    .map(|f| OwnedValue::try_from(f.clone()))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Self(fields))
            }
            _ => Ok(self),
        }
    }
}

impl Dict {
    /// Optional typed entry. A present entry of the wrong type is an error.
    pub(crate) fn get<T: FromArg>(&self, key: &str) -> Result<Option<T>> {
        self.0.get(key).map(|v| T::from_arg(v)).transpose()
    }

    /// Required typed entry.
    pub(crate) fn require<T: FromArg>(&self, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| ConnlineError::MalformedReply(format!("missing key {key}")))
    }

    /// Nested `a{sv}` under `key`.
    pub(crate) fn dict(&self, key: &str) -> Result<Option<Dict>> {
        self.get(key)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, OwnedValue>> for Dict {
    fn from(map: HashMap<String, OwnedValue>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for building argument lists in tests.

    use super::*;

    pub(crate) fn owned<'a>(value: impl Into<Value<'a>>) -> OwnedValue {
        OwnedValue::try_from(value.into()).expect("test value must convert")
    }

    pub(crate) fn args(values: Vec<OwnedValue>) -> Args {
        Args::new(values)
    }

    pub(crate) fn dict(entries: Vec<(&str, OwnedValue)>) -> OwnedValue {
        let map: HashMap<String, OwnedValue> = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        owned(Value::from(map))
    }

    pub(crate) fn variant<'a>(value: impl Into<Value<'a>>) -> OwnedValue {
        owned(Value::Value(Box::new(value.into())))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn reads_plain_and_wrapped_scalars() {
        let a = args(vec![owned(70u32), variant(true), variant("eth0")]);

        assert_eq!(a.get::<u32>(0).unwrap(), 70);
        assert!(a.get::<bool>(1).unwrap());
        assert_eq!(a.get::<String>(2).unwrap(), "eth0");
    }

    #[test]
    fn type_mismatch_is_malformed() {
        let a = args(vec![owned("connected")]);
        assert!(matches!(
            a.get::<u32>(0),
            Err(ConnlineError::MalformedReply(_))
        ));
    }

    #[test]
    fn missing_argument_is_malformed() {
        let a = args(vec![]);
        assert!(matches!(
            a.get::<String>(0),
            Err(ConnlineError::MalformedReply(_))
        ));
    }

    #[test]
    fn reads_string_arrays() {
        let a = args(vec![owned(vec!["192.168.0.4", "home"])]);
        assert_eq!(
            a.get::<Vec<String>>(0).unwrap(),
            vec!["192.168.0.4".to_string(), "home".to_string()]
        );
    }

    #[test]
    fn reads_nested_dictionaries() {
        let ipv4 = dict(vec![("Address", owned("10.0.0.1"))]);
        let settings = dict(vec![("State", variant("online")), ("IPv4", variant(ipv4))]);
        let a = args(vec![settings]);

        let d = a.dict(0).unwrap();
        assert_eq!(d.require::<String>("State").unwrap(), "online");
        assert!(d.get::<String>("Bearer").unwrap().is_none());

        let inner = d.dict("IPv4").unwrap().unwrap();
        assert_eq!(inner.get::<String>("Address").unwrap().as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn require_reports_missing_key() {
        let a = args(vec![dict(vec![("Managed", owned(true))])]);
        let d = a.dict(0).unwrap();
        assert!(d.require::<u32>("State").is_err());
        assert!(d.require::<bool>("Managed").unwrap());
    }

    #[test]
    fn untuple_expands_structures() {
        let status = Value::from(Structure::from((2u32, vec!["10.1.1.1".to_string()])));
        let a = args(vec![owned(status)]).untuple().unwrap();

        assert_eq!(a.len(), 2);
        assert_eq!(a.get::<u32>(0).unwrap(), 2);
        assert_eq!(a.get::<Vec<String>>(1).unwrap(), vec!["10.1.1.1".to_string()]);
    }

    #[test]
    fn untuple_leaves_flat_lists_alone() {
        let a = args(vec![owned(3u32), owned(vec!["10.1.1.1"])]).untuple().unwrap();
        assert_eq!(a.len(), 2);
    }

    fn call(member: &str) -> zbus::message::Builder<'_> {
        Message::method_call("/org/example/Object", member)
            .unwrap()
            .interface("org.example.Interface")
            .unwrap()
    }

    #[test]
    fn decodes_empty_bodies() {
        let msg = call("Release").build(&()).unwrap();
        assert_eq!(Args::from_message(&msg).unwrap().len(), 0);
    }

    #[test]
    fn decodes_single_scalar_body() {
        let msg = call("state").build(&70u32).unwrap();
        let a = Args::from_message(&msg).unwrap();

        assert_eq!(a.len(), 1);
        assert_eq!(a.get::<u32>(0).unwrap(), 70);
    }

    #[test]
    fn decodes_object_paths() {
        let session = zvariant::ObjectPath::try_from("/net/connman/session/3").unwrap();
        let msg = call("CreateSession").build(&session).unwrap();
        assert_eq!(
            Args::from_message(&msg).unwrap().get::<String>(0).unwrap(),
            "/net/connman/session/3"
        );

        let devices = vec![
            zvariant::ObjectPath::try_from("/org/freedesktop/NetworkManager/Devices/1").unwrap(),
            zvariant::ObjectPath::try_from("/org/freedesktop/NetworkManager/Devices/2").unwrap(),
        ];
        let msg = call("GetDevices").build(&devices).unwrap();
        let paths = Args::from_message(&msg).unwrap().get::<Vec<String>>(0).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[1].ends_with("/Devices/2"));
    }

    #[test]
    fn decodes_status_pairs_flat_and_packed() {
        let flat = call("GetConnectionStatus")
            .build(&(2u32, vec!["10.0.0.1", "home"]))
            .unwrap();
        let packed = call("StatusChanged")
            .build(&((2u32, vec!["10.0.0.1", "home"]),))
            .unwrap();

        for msg in [flat, packed] {
            let a = Args::from_message(&msg).unwrap().untuple().unwrap();
            assert_eq!(a.get::<u32>(0).unwrap(), 2);
            assert_eq!(
                a.get::<Vec<String>>(1).unwrap(),
                vec!["10.0.0.1".to_string(), "home".to_string()]
            );
        }
    }

    #[test]
    fn decodes_settings_dictionaries() {
        let ipv4: HashMap<&str, Value<'_>> = HashMap::from([("Address", Value::from("10.0.0.1"))]);
        let settings: HashMap<&str, Value<'_>> = HashMap::from([
            ("State", Value::from("online")),
            ("Managed", Value::from(true)),
            ("IPv4", Value::from(ipv4)),
        ]);
        let msg = call("Update").build(&settings).unwrap();
        let d = Args::from_message(&msg).unwrap().dict(0).unwrap();

        assert_eq!(d.require::<String>("State").unwrap(), "online");
        assert!(d.require::<bool>("Managed").unwrap());
        let inner = d.dict("IPv4").unwrap().unwrap();
        assert_eq!(inner.get::<String>("Address").unwrap().as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn decodes_variant_wrapped_address_data() {
        let entry: HashMap<&str, Value<'_>> = HashMap::from([
            ("address", Value::from("192.168.4.9")),
            ("prefix", Value::from(24u32)),
        ]);
        let msg = call("Get").build(&Value::from(vec![entry])).unwrap();
        let entries = Args::from_message(&msg).unwrap().get::<Vec<Dict>>(0).unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].get::<String>("address").unwrap().as_deref(),
            Some("192.168.4.9")
        );
    }
}
