// Shared helpers for integration tests.
//
// Provides an in-memory fake device speaking a handful of request names and
// sample customizers for interfaces and a feature flag, so each integration
// test can assemble an engine without repeating device boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use serde::Deserialize;
use serde_json::{Value, json};

use treeconf::config::EngineConfig;
use treeconf::context::{ReadContext, WriteContext};
use treeconf::data::{Node, NodeBuilder};
use treeconf::device::{DeviceCall, DeviceError, Reply, ReplyFuture, ReplyPromise, Request};
use treeconf::engine::Engine;
use treeconf::naming::DeviceKey;
use treeconf::path::{Key, NodePath};
use treeconf::read::{ListReaderCustomizer, Reader, ReaderCustomizer};
use treeconf::schema::Schema;
use treeconf::write::{Writer, WriterCustomizer};

/// Parse a node path, panicking on bad test input.
pub fn path(s: &str) -> NodePath {
    s.parse().expect("valid node path")
}

#[derive(Debug, Default)]
struct DeviceState {
    interfaces: BTreeMap<u32, u32>,
    next_index: u32,
    gpe_enabled: bool,
}

/// In-memory device answering a small request vocabulary.
///
/// Every request name is recorded. A request can be made to fail with
/// [`reject_after`](Self::reject_after) or to never reply with
/// [`hang`](Self::hang).
#[derive(Debug, Default)]
pub struct FakeDevice {
    state: Mutex<DeviceState>,
    requests: Mutex<Vec<String>>,
    rejected: Mutex<Vec<(String, usize)>>,
    hanging: Mutex<Vec<String>>,
    unresolved: Mutex<Vec<ReplyPromise>>,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pre-populate an interface the engine did not create.
    pub fn seed_interface(&self, mtu: u32) -> u32 {
        let mut state = self.state.lock().expect("device state");
        state.next_index += 1;
        let index = state.next_index;
        state.interfaces.insert(index, mtu);
        index
    }

    /// Let `successes` more requests named `name` through, then fail
    /// every later one.
    pub fn reject_after(&self, name: &str, successes: usize) {
        self.rejected
            .lock()
            .expect("rejected")
            .push((name.to_string(), successes));
    }

    fn should_reject(&self, name: &str) -> bool {
        let mut rejected = self.rejected.lock().expect("rejected");
        let Some((_, remaining)) = rejected.iter_mut().find(|(n, _)| n == name) else {
            return false;
        };
        if *remaining == 0 {
            return true;
        }
        *remaining -= 1;
        false
    }

    /// Never reply to requests named `name`.
    pub fn hang(&self, name: &str) {
        self.hanging.lock().expect("hanging").push(name.to_string());
    }

    /// Names of every request received, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("requests").clone()
    }

    /// Requests named `name` received so far.
    pub fn count(&self, name: &str) -> usize {
        self.requests().iter().filter(|r| *r == name).count()
    }

    /// MTU per interface index.
    pub fn interfaces(&self) -> BTreeMap<u32, u32> {
        self.state.lock().expect("device state").interfaces.clone()
    }

    pub fn gpe_enabled(&self) -> bool {
        self.state.lock().expect("device state").gpe_enabled
    }

    fn handle(&self, request: &Request) -> Result<Value, DeviceError> {
        let mut state = self.state.lock().expect("device state");
        let field = |name: &str| {
            request.payload[name]
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| DeviceError::Transport(format!("missing field {name}")))
        };
        match request.name.as_str() {
            "sw_interface_dump" => {
                let interfaces: Vec<Value> = state
                    .interfaces
                    .iter()
                    .map(|(index, mtu)| json!({"sw_if_index": index, "mtu": mtu}))
                    .collect();
                Ok(json!({ "interfaces": interfaces }))
            }
            "create_loopback" => {
                let mtu = field("mtu")?;
                state.next_index += 1;
                let index = state.next_index;
                state.interfaces.insert(index, mtu);
                Ok(json!({ "sw_if_index": index }))
            }
            "delete_loopback" => {
                let index = field("sw_if_index")?;
                state.interfaces.remove(&index).map(|_| json!({})).ok_or_else(|| {
                    DeviceError::Rejected {
                        request: request.name.clone(),
                        retval: -2,
                        message: format!("no interface {index}"),
                    }
                })
            }
            "sw_interface_set_mtu" => {
                let index = field("sw_if_index")?;
                let mtu = field("mtu")?;
                state.interfaces.insert(index, mtu);
                Ok(json!({}))
            }
            "gpe_enable_disable" => {
                state.gpe_enabled = request.payload["is_en"].as_bool().unwrap_or(false);
                Ok(json!({}))
            }
            "show_gpe_status" => Ok(json!({ "is_en": state.gpe_enabled })),
            other => Err(DeviceError::Transport(format!("unknown request {other}"))),
        }
    }
}

impl DeviceCall for FakeDevice {
    fn invoke(&self, request: Request) -> ReplyFuture {
        self.requests
            .lock()
            .expect("requests")
            .push(request.name.clone());

        if self.hanging.lock().expect("hanging").contains(&request.name) {
            let (future, promise) = ReplyFuture::pending(request.name);
            self.unresolved.lock().expect("unresolved").push(promise);
            return future;
        }
        if self.should_reject(&request.name) {
            let error = DeviceError::Rejected {
                request: request.name.clone(),
                retval: -1,
                message: "rejected by test".to_string(),
            };
            return ReplyFuture::ready(request.name, Err(error));
        }
        let result = self.handle(&request).map(Reply::new);
        ReplyFuture::ready(request.name, result)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DumpedInterface {
    pub sw_if_index: u32,
    pub mtu: u32,
}

#[derive(Debug, Deserialize)]
struct InterfaceDump {
    interfaces: Vec<DumpedInterface>,
}

#[derive(Debug, Deserialize)]
struct Created {
    sw_if_index: u32,
}

fn interface_name(path: &NodePath) -> anyhow::Result<&str> {
    path.key()
        .and_then(|k| k.get("name"))
        .with_context(|| format!("{path} has no interface name"))
}

fn index_of(key: &DeviceKey) -> anyhow::Result<u32> {
    match key {
        DeviceKey::Index(index) => Ok(*index),
        other => anyhow::bail!("interface key {other} is not an index"),
    }
}

/// Reader of `/interfaces/interface`; one dump per transaction.
pub struct InterfaceReader {
    pub device: Arc<dyn DeviceCall>,
}

impl InterfaceReader {
    fn dump(&self, ctx: &ReadContext<'_>) -> anyhow::Result<Arc<Vec<DumpedInterface>>> {
        ctx.cache()
            .get_or_load("sw_interface_dump", &NodePath::root(), || {
                let reply = ctx.wait(self.device.invoke(Request::new("sw_interface_dump", json!({}))))?;
                Ok(reply.decode::<InterfaceDump>()?.interfaces)
            })
    }
}

impl ReaderCustomizer for InterfaceReader {
    fn read_current_attributes(
        &self,
        path: &NodePath,
        builder: &mut NodeBuilder,
        ctx: &ReadContext<'_>,
    ) -> anyhow::Result<()> {
        let naming = ctx.naming("interface")?;
        let name = interface_name(path)?;
        if !naming.contains(name)? {
            return Ok(());
        }
        let index = index_of(&naming.get(name)?)?;
        if let Some(found) = self.dump(ctx)?.iter().find(|i| i.sw_if_index == index) {
            builder.set("mtu", found.mtu);
        }
        Ok(())
    }
}

impl ListReaderCustomizer for InterfaceReader {
    fn all_ids(&self, _path: &NodePath, ctx: &ReadContext<'_>) -> anyhow::Result<Vec<Key>> {
        let naming = ctx.naming("interface")?;
        self.dump(ctx)?
            .iter()
            .map(|i| {
                let (name, _) = naming.get_or_create(&DeviceKey::Index(i.sw_if_index))?;
                Ok(Key::single("name", name))
            })
            .collect()
    }
}

/// Writer of `/interfaces/interface`; owns the interface identity map.
pub struct InterfaceWriter {
    pub device: Arc<dyn DeviceCall>,
    pub in_place: bool,
}

impl WriterCustomizer for InterfaceWriter {
    fn create(&self, path: &NodePath, after: &Node, ctx: &mut WriteContext<'_>) -> anyhow::Result<()> {
        let name = interface_name(path)?;
        let mtu = after["mtu"].as_u64().unwrap_or(1500);
        let reply = ctx.wait(self.device.invoke(Request::new("create_loopback", json!({"mtu": mtu}))))?;
        let created: Created = reply.decode()?;
        ctx.naming("interface")?
            .put(name, &DeviceKey::Index(created.sw_if_index));
        Ok(())
    }

    fn update(
        &self,
        path: &NodePath,
        _before: &Node,
        after: &Node,
        ctx: &mut WriteContext<'_>,
    ) -> anyhow::Result<()> {
        let index = index_of(&ctx.naming("interface")?.get(interface_name(path)?)?)?;
        let mtu = after["mtu"].as_u64().unwrap_or(1500);
        ctx.wait(self.device.invoke(Request::new(
            "sw_interface_set_mtu",
            json!({"sw_if_index": index, "mtu": mtu}),
        )))?;
        Ok(())
    }

    fn delete(&self, path: &NodePath, _before: &Node, ctx: &mut WriteContext<'_>) -> anyhow::Result<()> {
        let name = interface_name(path)?;
        let index = index_of(&ctx.naming("interface")?.get(name)?)?;
        ctx.wait(self.device.invoke(Request::new("delete_loopback", json!({"sw_if_index": index}))))?;
        ctx.naming("interface")?.remove(name)?;
        Ok(())
    }

    fn supports_update(&self) -> bool {
        self.in_place
    }
}

/// Reader and writer of the `/gpe-feature` flag.
pub struct GpeFeature {
    pub device: Arc<dyn DeviceCall>,
}

impl ReaderCustomizer for GpeFeature {
    fn read_current_attributes(
        &self,
        _path: &NodePath,
        builder: &mut NodeBuilder,
        ctx: &ReadContext<'_>,
    ) -> anyhow::Result<()> {
        let reply = ctx.wait(self.device.invoke(Request::new("show_gpe_status", json!({}))))?;
        if reply.payload["is_en"].as_bool().unwrap_or(false) {
            builder.set("enable", true);
        }
        Ok(())
    }
}

impl WriterCustomizer for GpeFeature {
    fn create(&self, _path: &NodePath, after: &Node, ctx: &mut WriteContext<'_>) -> anyhow::Result<()> {
        let enable = after["enable"].as_bool().unwrap_or(false);
        ctx.wait(self.device.invoke(Request::new("gpe_enable_disable", json!({"is_en": enable}))))?;
        Ok(())
    }

    fn delete(&self, _path: &NodePath, _before: &Node, ctx: &mut WriteContext<'_>) -> anyhow::Result<()> {
        ctx.wait(self.device.invoke(Request::new("gpe_enable_disable", json!({"is_en": false}))))?;
        Ok(())
    }
}

/// Schema of the sample tree.
pub fn schema() -> Schema {
    Schema::new()
        .container(path("/interfaces"))
        .list(path("/interfaces/interface"), &["name"])
        .container(path("/gpe-feature"))
}

/// Configuration with an `interface` scope naming unknown interfaces
/// `local<index>`.
pub fn config() -> EngineConfig {
    EngineConfig::from_toml(
        r#"
[engine]
reply_timeout_ms = 200

[[naming]]
scope = "interface"
policy = { kind = "indexed", prefix = "local" }
"#,
    )
    .expect("valid test config")
}

/// Engine over `device` with the sample customizers. The GPE feature is
/// written before interfaces.
pub fn engine_with(device: &Arc<FakeDevice>, config: EngineConfig, in_place: bool) -> Engine {
    let call: Arc<dyn DeviceCall> = Arc::clone(device) as Arc<dyn DeviceCall>;
    let mut builder = Engine::builder(&schema(), config);
    builder
        .readers()
        .add(path("/gpe-feature"), Reader::single(GpeFeature { device: Arc::clone(&call) }))
        .expect("register gpe reader")
        .add(
            path("/interfaces/interface"),
            Reader::list(InterfaceReader { device: Arc::clone(&call) }),
        )
        .expect("register interface reader");
    builder
        .writers()
        .add_before(
            path("/gpe-feature"),
            Writer::new(GpeFeature { device: Arc::clone(&call) }),
            &path("/interfaces/interface"),
        )
        .expect("register gpe writer")
        .add(
            path("/interfaces/interface"),
            Writer::new(InterfaceWriter {
                device: call,
                in_place,
            }),
        )
        .expect("register interface writer");
    builder.build().expect("build engine")
}

/// Engine with default configuration and delete-then-create updates.
pub fn engine(device: &Arc<FakeDevice>) -> Engine {
    engine_with(device, config(), false)
}
