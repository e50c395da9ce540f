//! Request dispatch: JSON line in, JSON line out.
//!
//! Every request is an object with an `action` tag and an optional `ref`
//! that is echoed back verbatim. Lines that aren't JSON objects are dropped
//! without a response.

use std::collections::HashMap;
use std::time::Instant;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::color::Hsv;
use crate::controller::{ControllerConfig, ControllerId};
use crate::effect::{EffectId, EffectKind};
use crate::error::{LeddError, Result};
use crate::registers::MAX_ADDRESS;
use crate::runtime::Runtime;
use crate::stripe::StripeId;

/// Daemon version reported by `discover`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Success payload fields, merged into the response object.
type Payload = Map<String, Value>;

type Handler = fn(&mut Runtime, &Value) -> Result<Payload>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Discover,
    AddController,
    AddStripe,
    SetColor,
    GetColor,
    GetControllers,
    StartEffect,
    StopEffect,
    TestChannel,
    SetColorAll,
    GetEffects,
}

impl Action {
    pub const ALL: &'static [Action] = &[
        Action::Discover,
        Action::AddController,
        Action::AddStripe,
        Action::SetColor,
        Action::GetColor,
        Action::GetControllers,
        Action::StartEffect,
        Action::StopEffect,
        Action::TestChannel,
        Action::SetColorAll,
        Action::GetEffects,
    ];

    /// Wire tags accepted for this action. The first one is canonical.
    pub fn tags(self) -> &'static [&'static str] {
        match self {
            Action::Discover => &["discover"],
            Action::AddController => &["add_controller"],
            Action::AddStripe => &["add_stripe", "add_stripes"],
            Action::SetColor => &["set_color"],
            Action::GetColor => &["get_color"],
            Action::GetControllers => &["get_controllers", "get_stripes"],
            Action::StartEffect => &["start_effect"],
            Action::StopEffect => &["stop_effect"],
            Action::TestChannel => &["test_channel"],
            Action::SetColorAll => &["set_color_all"],
            Action::GetEffects => &["get_effects"],
        }
    }

    fn handler(self) -> Handler {
        match self {
            Action::Discover => discover,
            Action::AddController => add_controller,
            Action::AddStripe => add_stripe,
            Action::SetColor => set_color,
            Action::GetColor => get_color,
            Action::GetControllers => get_controllers,
            Action::StartEffect => start_effect,
            Action::StopEffect => stop_effect,
            Action::TestChannel => test_channel,
            Action::SetColorAll => set_color_all,
            Action::GetEffects => get_effects,
        }
    }
}

/// Tag → handler table, built once at startup.
pub struct Dispatcher {
    table: HashMap<&'static str, (Action, Handler)>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let mut table = HashMap::new();
        for &action in Action::ALL {
            for &tag in action.tags() {
                table.insert(tag, (action, action.handler()));
            }
        }
        Dispatcher { table }
    }

    pub fn lookup(&self, tag: &str) -> Option<Action> {
        self.table.get(tag).map(|(action, _)| *action)
    }

    /// Handle one framed line. `None` means no response is sent.
    pub fn handle(&self, runtime: &mut Runtime, line: &str) -> Option<String> {
        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("{}", LeddError::Protocol(format!("dropping malformed message: {e}")));
                return None;
            }
        };
        let response = self.handle_value(runtime, &request)?;
        Some(response.to_string())
    }

    /// Handle an already parsed request.
    pub fn handle_value(&self, runtime: &mut Runtime, request: &Value) -> Option<Value> {
        let Some(obj) = request.as_object() else {
            log::warn!("{}", LeddError::Protocol("dropping non-object message".into()));
            return None;
        };
        let reference = obj.get("ref").cloned().unwrap_or(Value::Null);

        let Some(tag) = obj.get("action").and_then(Value::as_str) else {
            return Some(failure("Missing action", reference));
        };
        let Some((action, handler)) = self.table.get(tag) else {
            log::debug!("unknown action {tag:?}");
            return Some(failure("No action found", reference));
        };

        log::debug!("{action:?} ref={reference}");
        let response = match handler(runtime, request) {
            Ok(payload) => success(payload, reference),
            Err(e) => {
                match &e {
                    LeddError::Device(_) => log::warn!("{tag}: {e}"),
                    _ => log::info!("{tag}: {e}"),
                }
                failure(&e.to_string(), reference)
            }
        };
        Some(response)
    }
}

fn success(mut payload: Payload, reference: Value) -> Value {
    payload.insert("success".into(), Value::Bool(true));
    payload.insert("ref".into(), reference);
    Value::Object(payload)
}

fn failure(message: &str, reference: Value) -> Value {
    json!({
        "success": false,
        "message": message,
        "ref": reference,
    })
}

/// Deserialize handler parameters from the request object. Unknown fields
/// (`action`, `ref`, extras) are ignored.
fn params<T: DeserializeOwned>(request: &Value) -> Result<T> {
    T::deserialize(request).map_err(|e| LeddError::Validation(format!("Invalid params: {e}")))
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

// ── Parameters ──

/// Bus address as an integer (`64`) or hex string (`"0x40"`, `"40"`).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Address {
    Int(u64),
    Text(String),
}

impl Address {
    fn resolve(&self) -> Result<u8> {
        let raw = match self {
            Address::Int(n) => *n,
            Address::Text(s) => {
                let s = s.trim();
                let digits = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                u64::from_str_radix(digits, 16)
                    .map_err(|_| LeddError::Validation(format!("Invalid address {s:?}")))?
            }
        };
        u8::try_from(raw)
            .ok()
            .filter(|a| *a <= MAX_ADDRESS)
            .ok_or_else(|| {
                LeddError::Range(format!("address 0x{raw:X} (valid 0x00..=0x{MAX_ADDRESS:02X})"))
            })
    }
}

#[derive(Debug, Deserialize)]
struct AddControllerParams {
    channels: u8,
    i2c_dev: u8,
    address: Address,
}

#[derive(Debug, Deserialize)]
struct Rgb3<T> {
    r: T,
    g: T,
    b: T,
}

impl<T: Copy> Rgb3<T> {
    fn to_array(&self) -> [T; 3] {
        [self.r, self.g, self.b]
    }
}

#[derive(Debug, Deserialize)]
struct AddStripeParams {
    name: String,
    rgb: bool,
    map: Rgb3<u8>,
    cid: ControllerId,
    #[serde(default)]
    gamma: Option<Rgb3<f64>>,
}

#[derive(Debug, Deserialize)]
struct SetColorParams {
    sid: StripeId,
    hsv: Hsv,
}

#[derive(Debug, Deserialize)]
struct StripeParams {
    sid: StripeId,
}

#[derive(Debug, Deserialize)]
struct StartEffectParams {
    sids: Vec<StripeId>,
    eid: Value,
    eopt: Value,
}

#[derive(Debug, Deserialize)]
struct StopEffectParams {
    eident: EffectId,
}

#[derive(Debug, Deserialize)]
struct TestChannelParams {
    cid: ControllerId,
    channel: u8,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct SetColorAllParams {
    cid: ControllerId,
    v: f64,
}

// ── Handlers ──

fn discover(_rt: &mut Runtime, _req: &Value) -> Result<Payload> {
    Ok(payload(json!({ "version": VERSION })))
}

fn add_controller(rt: &mut Runtime, req: &Value) -> Result<Payload> {
    let p: AddControllerParams = params(req)?;
    let config = ControllerConfig {
        bus_index: p.i2c_dev,
        address: p.address.resolve()?,
        channels: p.channels,
    };
    let cid = rt.add_controller(config)?;
    Ok(payload(json!({ "cid": cid })))
}

fn add_stripe(rt: &mut Runtime, req: &Value) -> Result<Payload> {
    let p: AddStripeParams = params(req)?;
    let gamma = p.gamma.as_ref().map(Rgb3::to_array);
    let sid = rt.add_stripe(p.cid, &p.name, p.rgb, p.map.to_array(), gamma)?;
    Ok(payload(json!({ "sid": sid })))
}

fn set_color(rt: &mut Runtime, req: &Value) -> Result<Payload> {
    let p: SetColorParams = params(req)?;
    rt.set_color(p.sid, p.hsv.normalized())?;
    Ok(Payload::new())
}

fn get_color(rt: &mut Runtime, req: &Value) -> Result<Payload> {
    let p: StripeParams = params(req)?;
    let color = rt.color(p.sid)?;
    Ok(payload(json!({ "color": color })))
}

fn get_controllers(rt: &mut Runtime, _req: &Value) -> Result<Payload> {
    let registry = rt.registry();
    let controllers: Vec<Value> = registry
        .controllers()
        .map(|c| {
            let stripes: Vec<Value> = registry
                .stripes_of(c)
                .map(|s| {
                    let [r, g, b] = s.channels();
                    let [gr, gg, gb] = s.gamma();
                    json!({
                        "id": s.id(),
                        "name": s.name(),
                        "rgb": s.is_rgb(),
                        "channel": { "r": r, "g": g, "b": b },
                        "gamma": { "r": gr, "g": gg, "b": gb },
                        "color": s.color(),
                    })
                })
                .collect();
            json!({
                "id": c.id(),
                "i2c_device": c.bus_index(),
                "address": format!("0x{:02x}", c.address()),
                "channel": c.channels(),
                "pwm_freq": c.frequency(),
                "stripes": stripes,
            })
        })
        .collect();
    Ok(payload(json!({
        "ccount": controllers.len(),
        "controller": controllers,
    })))
}

fn start_effect(rt: &mut Runtime, req: &Value) -> Result<Payload> {
    let p: StartEffectParams = params(req)?;
    if !p.eopt.is_object() {
        return Err(LeddError::Validation("Invalid params: eopt must be an object".into()));
    }
    let kind = match &p.eid {
        Value::String(s) => EffectKind::from_id(s),
        Value::Number(n) => n.as_u64().and_then(EffectKind::from_index),
        _ => return Err(LeddError::Validation("Invalid params: eid must be a string or integer".into())),
    }
    .ok_or_else(|| LeddError::NotFound("Effect".into()))?;
    let eident = rt.start_effect(kind.id(), kind.build(), p.sids, Instant::now())?;
    Ok(payload(json!({ "eident": eident })))
}

fn stop_effect(rt: &mut Runtime, req: &Value) -> Result<Payload> {
    let p: StopEffectParams = params(req)?;
    rt.stop_effect(p.eident)?;
    Ok(Payload::new())
}

fn test_channel(rt: &mut Runtime, req: &Value) -> Result<Payload> {
    let p: TestChannelParams = params(req)?;
    rt.test_channel(p.cid, p.channel, p.value)?;
    Ok(Payload::new())
}

fn set_color_all(rt: &mut Runtime, req: &Value) -> Result<Payload> {
    let p: SetColorAllParams = params(req)?;
    rt.set_all(p.cid, p.v)?;
    Ok(Payload::new())
}

fn get_effects(rt: &mut Runtime, _req: &Value) -> Result<Payload> {
    let effects: Vec<_> = EffectKind::ALL.iter().map(|k| k.info()).collect();
    let running: Vec<Value> = rt
        .effects()
        .map(|s| {
            json!({
                "eident": s.id(),
                "eid": s.label(),
                "sids": s.stripes(),
            })
        })
        .collect();
    Ok(payload(json!({
        "effects": effects,
        "running": running,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mock::MockBusProvider;
    use crate::registers::off_register;
    use crate::runtime::RuntimeSettings;
    use crate::store::MemoryStore;

    fn setup() -> (Dispatcher, Runtime, MockBusProvider) {
        let provider = MockBusProvider::new();
        let rt = Runtime::new(
            Box::new(MemoryStore::new()),
            Box::new(provider.clone()),
            RuntimeSettings::default(),
        );
        (Dispatcher::new(), rt, provider)
    }

    fn call(d: &Dispatcher, rt: &mut Runtime, request: Value) -> Value {
        let line = request.to_string();
        let out = d.handle(rt, &line).expect("expected a response");
        serde_json::from_str(&out).unwrap()
    }

    fn add_controller_and_stripe(d: &Dispatcher, rt: &mut Runtime) -> (u64, u64) {
        let r = call(
            d,
            rt,
            json!({"action": "add_controller", "ref": "c", "channels": 16, "i2c_dev": 1, "address": "0x40"}),
        );
        let cid = r["cid"].as_u64().unwrap();
        let r = call(
            d,
            rt,
            json!({"action": "add_stripe", "ref": "s", "name": "desk", "rgb": true,
                   "map": {"r": 0, "g": 1, "b": 2}, "cid": cid}),
        );
        (cid, r["sid"].as_u64().unwrap())
    }

    #[test]
    fn every_tag_is_registered() {
        let d = Dispatcher::new();
        for &action in Action::ALL {
            for tag in action.tags() {
                assert_eq!(d.lookup(tag), Some(action));
            }
        }
        assert_eq!(d.lookup("add_stripes"), Some(Action::AddStripe));
        assert_eq!(d.lookup("get_stripes"), Some(Action::GetControllers));
    }

    #[test]
    fn unknown_action() {
        let (d, mut rt, _) = setup();
        let r = call(&d, &mut rt, json!({"action": "bogus", "ref": "r1"}));
        assert_eq!(r, json!({"success": false, "message": "No action found", "ref": "r1"}));
    }

    #[test]
    fn missing_action() {
        let (d, mut rt, _) = setup();
        let r = call(&d, &mut rt, json!({"ref": 7}));
        assert_eq!(r, json!({"success": false, "message": "Missing action", "ref": 7}));
    }

    #[test]
    fn ref_absent_is_null() {
        let (d, mut rt, _) = setup();
        let r = call(&d, &mut rt, json!({"action": "discover"}));
        assert_eq!(r["ref"], Value::Null);
        assert_eq!(r["success"], true);
        assert_eq!(r["version"], VERSION);
    }

    #[test]
    fn malformed_input_gets_no_response() {
        let (d, mut rt, _) = setup();
        assert!(d.handle(&mut rt, "{not json").is_none());
        assert!(d.handle(&mut rt, "[1, 2, 3]").is_none());
        assert!(d.handle(&mut rt, "\"discover\"").is_none());
    }

    #[test]
    fn add_controller_accepts_int_and_hex_addresses() {
        let (d, mut rt, provider) = setup();
        let r = call(
            &d,
            &mut rt,
            json!({"action": "add_controller", "channels": 16, "i2c_dev": 1, "address": 64}),
        );
        assert_eq!(r["success"], true);
        let r = call(
            &d,
            &mut rt,
            json!({"action": "add_controller", "channels": 8, "i2c_dev": 2, "address": "41"}),
        );
        assert_eq!(r["success"], true);
        assert_ne!(provider.bus(2).byte(0x41, crate::registers::PRESCALE), 0);
    }

    #[test]
    fn add_controller_rejects_bad_input() {
        let (d, mut rt, _) = setup();
        let r = call(
            &d,
            &mut rt,
            json!({"action": "add_controller", "channels": 16, "i2c_dev": 1, "address": "0x80"}),
        );
        assert_eq!(r["success"], false);
        assert!(r["message"].as_str().unwrap().starts_with("Out of range"));

        let r = call(
            &d,
            &mut rt,
            json!({"action": "add_controller", "channels": 16, "address": "0x40"}),
        );
        assert_eq!(r["success"], false);
        assert!(r["message"].as_str().unwrap().starts_with("Invalid params"));

        let r = call(
            &d,
            &mut rt,
            json!({"action": "add_controller", "channels": 16, "i2c_dev": 1, "address": "zz"}),
        );
        assert_eq!(r["message"], "Invalid address \"zz\"");
    }

    #[test]
    fn set_then_get_color() {
        let (d, mut rt, provider) = setup();
        let (_, sid) = add_controller_and_stripe(&d, &mut rt);
        let r = call(
            &d,
            &mut rt,
            json!({"action": "set_color", "ref": 1, "sid": sid, "hsv": {"h": 240.0, "s": 1.0, "v": 1.0}}),
        );
        assert_eq!(r, json!({"success": true, "ref": 1}));
        assert_eq!(provider.bus(1).word(0x40, off_register(2)), 4095);

        let r = call(&d, &mut rt, json!({"action": "get_color", "ref": 2, "sid": sid}));
        assert_eq!(r["color"], json!({"h": 240.0, "s": 1.0, "v": 1.0}));
    }

    #[test]
    fn unknown_stripe() {
        let (d, mut rt, _) = setup();
        let r = call(&d, &mut rt, json!({"action": "get_color", "sid": 42}));
        assert_eq!(r["message"], "Stripe not found");
        let r = call(
            &d,
            &mut rt,
            json!({"action": "set_color", "sid": 42, "hsv": {"h": 0, "s": 0, "v": 0}}),
        );
        assert_eq!(r["message"], "Stripe not found");
    }

    #[test]
    fn add_stripe_with_custom_gamma() {
        let (d, mut rt, _) = setup();
        let (cid, _) = add_controller_and_stripe(&d, &mut rt);
        let r = call(
            &d,
            &mut rt,
            json!({"action": "add_stripes", "name": "shelf", "rgb": true, "cid": cid,
                   "map": {"r": 3, "g": 4, "b": 5}, "gamma": {"r": 2.2, "g": 2.0, "b": 1.8}}),
        );
        let sid = r["sid"].as_u64().unwrap();
        assert_eq!(rt.registry().stripe(sid).unwrap().gamma(), [2.2, 2.0, 1.8]);
    }

    #[test]
    fn listing_shape() {
        let (d, mut rt, _) = setup();
        let (cid, sid) = add_controller_and_stripe(&d, &mut rt);
        let r = call(&d, &mut rt, json!({"action": "get_stripes", "ref": "l"}));
        assert_eq!(r["ccount"], 1);
        let c = &r["controller"][0];
        assert_eq!(c["id"], cid);
        assert_eq!(c["address"], "0x40");
        assert_eq!(c["channel"], 16);
        assert_eq!(c["pwm_freq"], 1526);
        assert_eq!(c["i2c_device"], 1);
        let s = &c["stripes"][0];
        assert_eq!(s["id"], sid);
        assert_eq!(s["name"], "desk");
        assert_eq!(s["channel"], json!({"r": 0, "g": 1, "b": 2}));
    }

    #[test]
    fn start_and_stop_effect() {
        let (d, mut rt, _) = setup();
        let (_, sid) = add_controller_and_stripe(&d, &mut rt);
        let r = call(
            &d,
            &mut rt,
            json!({"action": "start_effect", "sids": [sid], "eid": "fade", "eopt": {}}),
        );
        assert_eq!(r["success"], true);
        let eident = r["eident"].as_u64().unwrap();

        let r = call(&d, &mut rt, json!({"action": "get_effects"}));
        assert_eq!(r["effects"][0]["eid"], "fade");
        assert_eq!(r["running"][0]["eident"], eident);
        assert_eq!(r["running"][0]["sids"], json!([sid]));

        let r = call(&d, &mut rt, json!({"action": "stop_effect", "eident": eident}));
        assert_eq!(r["success"], true);
        let r = call(&d, &mut rt, json!({"action": "stop_effect", "eident": eident}));
        assert_eq!(r["message"], "Effect not found");
    }

    #[test]
    fn start_effect_rejects_bad_input() {
        let (d, mut rt, _) = setup();
        let (_, sid) = add_controller_and_stripe(&d, &mut rt);
        let r = call(
            &d,
            &mut rt,
            json!({"action": "start_effect", "sids": [sid], "eid": "strobe", "eopt": {}}),
        );
        assert_eq!(r["message"], "Effect not found");
        let r = call(
            &d,
            &mut rt,
            json!({"action": "start_effect", "sids": [sid], "eid": "fade", "eopt": 3}),
        );
        assert_eq!(r["success"], false);
        let r = call(
            &d,
            &mut rt,
            json!({"action": "start_effect", "sids": [], "eid": "fade", "eopt": {}}),
        );
        assert_eq!(r["message"], "No stripes given");
        let r = call(&d, &mut rt, json!({"action": "start_effect", "sids": [sid], "eid": 0}));
        assert!(r["message"].as_str().unwrap().contains("eopt"));
    }

    #[test]
    fn test_channel_and_set_color_all() {
        let (d, mut rt, provider) = setup();
        let (cid, _) = add_controller_and_stripe(&d, &mut rt);
        let r = call(
            &d,
            &mut rt,
            json!({"action": "test_channel", "cid": cid, "channel": 7, "value": 1.0}),
        );
        assert_eq!(r["success"], true);
        assert_eq!(provider.bus(1).word(0x40, off_register(7)), 4095);

        let r = call(&d, &mut rt, json!({"action": "set_color_all", "cid": cid, "v": 0.5}));
        assert_eq!(r["success"], true);
        assert_eq!(
            provider.bus(1).word(0x40, crate::registers::ALL_LED_OFF_L),
            2048
        );

        let r = call(
            &d,
            &mut rt,
            json!({"action": "test_channel", "cid": 99, "channel": 0, "value": 1.0}),
        );
        assert_eq!(r["message"], "Controller not found");
    }

    #[test]
    fn device_errors_are_reported() {
        let (d, mut rt, provider) = setup();
        let (_, sid) = add_controller_and_stripe(&d, &mut rt);
        provider.bus(1).state().fail_writes = true;
        let r = call(
            &d,
            &mut rt,
            json!({"action": "set_color", "ref": "x", "sid": sid, "hsv": {"h": 0, "s": 1, "v": 1}}),
        );
        assert_eq!(r["success"], false);
        assert_eq!(r["ref"], "x");
        assert!(r["message"].as_str().unwrap().contains("I2C transfer failed"));
    }
}
