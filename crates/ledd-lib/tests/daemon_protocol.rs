//! End-to-end protocol tests: a real TCP daemon on the loopback interface,
//! backed by the mock bus and an in-memory store.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use ledd_lib::bus::mock::MockBusProvider;
use ledd_lib::daemon::Daemon;
use ledd_lib::registers::off_register;
use ledd_lib::runtime::{Runtime, RuntimeSettings};
use ledd_lib::store::MemoryStore;
use serde_json::{Value, json};

struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Client {
    fn connect(daemon: &Daemon) -> Self {
        let stream = TcpStream::connect(daemon.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Client {
            writer: stream.try_clone().unwrap(),
            reader: BufReader::new(stream),
        }
    }

    fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).unwrap();
        self.writer.flush().unwrap();
    }

    fn read_reply(&mut self) -> Value {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        assert!(line.ends_with('\n'), "reply must end with a newline: {line:?}");
        serde_json::from_str(&line).unwrap()
    }

    fn call(&mut self, request: Value) -> Value {
        self.send_raw(format!("{request}\n").as_bytes());
        self.read_reply()
    }
}

fn start() -> (Daemon, MockBusProvider) {
    let provider = MockBusProvider::new();
    let runtime = Runtime::new(
        Box::new(MemoryStore::new()),
        Box::new(provider.clone()),
        RuntimeSettings {
            tick_interval: Duration::from_millis(10),
            ..RuntimeSettings::default()
        },
    );
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    (Daemon::start(listener, runtime).unwrap(), provider)
}

fn setup_stripe(client: &mut Client) -> (u64, u64) {
    let r = client.call(json!({
        "action": "add_controller", "ref": "c1",
        "channels": 16, "i2c_dev": 1, "address": "0x40"
    }));
    assert_eq!(r["success"], true, "{r}");
    let cid = r["cid"].as_u64().unwrap();
    let r = client.call(json!({
        "action": "add_stripe", "ref": "s1",
        "name": "desk", "rgb": true, "map": {"r": 0, "g": 1, "b": 2}, "cid": cid
    }));
    assert_eq!(r["success"], true, "{r}");
    (cid, r["sid"].as_u64().unwrap())
}

#[test]
fn unknown_action_exact_reply() {
    let (daemon, _) = start();
    let mut client = Client::connect(&daemon);
    let r = client.call(json!({"action": "bogus", "ref": "r1"}));
    assert_eq!(
        r,
        json!({"success": false, "message": "No action found", "ref": "r1"})
    );
    daemon.shutdown().unwrap();
}

#[test]
fn discover_reports_version() {
    let (daemon, _) = start();
    let mut client = Client::connect(&daemon);
    let r = client.call(json!({"action": "discover", "ref": {"nested": [1, 2]}}));
    assert_eq!(r["success"], true);
    assert_eq!(r["version"], ledd_lib::dispatch::VERSION);
    assert_eq!(r["ref"], json!({"nested": [1, 2]}));
    daemon.shutdown().unwrap();
}

#[test]
fn set_color_then_get_color_round_trips() {
    let (daemon, provider) = start();
    let mut client = Client::connect(&daemon);
    let (_, sid) = setup_stripe(&mut client);

    let hsv = json!({"h": 120.0, "s": 1.0, "v": 1.0});
    let r = client.call(json!({"action": "set_color", "ref": "set", "sid": sid, "hsv": hsv}));
    assert_eq!(r, json!({"success": true, "ref": "set"}));

    let r = client.call(json!({"action": "get_color", "ref": "get", "sid": sid}));
    assert_eq!(r["success"], true);
    assert_eq!(r["ref"], "get");
    assert_eq!(r["color"], hsv);

    // Green at full value: G channel fully on, R and B off.
    let bus = provider.bus(1);
    assert_eq!(bus.word(0x40, off_register(0)), 0);
    assert_eq!(bus.word(0x40, off_register(1)), 4095);
    assert_eq!(bus.word(0x40, off_register(2)), 0);
    daemon.shutdown().unwrap();
}

#[test]
fn malformed_line_gets_no_reply_and_connection_survives() {
    let (daemon, _) = start();
    let mut client = Client::connect(&daemon);
    client.send_raw(b"{this is not json\n");
    client.send_raw(b"\n");
    client.send_raw(&[0xff, 0xfe, 0xfd, b'\n']);
    // The next reply must belong to the next valid request.
    let r = client.call(json!({"action": "discover", "ref": "after"}));
    assert_eq!(r["ref"], "after");
    daemon.shutdown().unwrap();
}

#[test]
fn several_requests_in_one_write() {
    let (daemon, _) = start();
    let mut client = Client::connect(&daemon);
    client.send_raw(b"{\"action\":\"discover\",\"ref\":1}\n{\"action\":\"nope\",\"ref\":2}\r\n");
    let a = client.read_reply();
    let b = client.read_reply();
    assert_eq!(a["ref"], 1);
    assert_eq!(a["success"], true);
    assert_eq!(b["ref"], 2);
    assert_eq!(b["message"], "No action found");
    daemon.shutdown().unwrap();
}

#[test]
fn clients_share_the_registry() {
    let (daemon, _) = start();
    let mut a = Client::connect(&daemon);
    let mut b = Client::connect(&daemon);
    let (_, sid) = setup_stripe(&mut a);
    b.call(json!({"action": "set_color", "sid": sid, "hsv": {"h": 30.0, "s": 0.5, "v": 0.25}}));
    let r = a.call(json!({"action": "get_color", "sid": sid}));
    assert_eq!(r["color"], json!({"h": 30.0, "s": 0.5, "v": 0.25}));

    let r = b.call(json!({"action": "get_controllers"}));
    assert_eq!(r["ccount"], 1);
    assert_eq!(r["controller"][0]["stripes"][0]["id"], sid);
    daemon.shutdown().unwrap();
}

#[test]
fn effect_lifecycle_over_tcp() {
    let (daemon, provider) = start();
    let mut client = Client::connect(&daemon);
    let (_, sid) = setup_stripe(&mut client);

    let r = client.call(json!({
        "action": "start_effect", "ref": "e",
        "sids": [sid], "eid": "fade", "eopt": {}
    }));
    assert_eq!(r["success"], true, "{r}");
    let eident = r["eident"].as_u64().unwrap();

    std::thread::sleep(Duration::from_millis(100));
    let r = client.call(json!({"action": "get_effects"}));
    assert_eq!(r["running"][0]["eident"], eident);

    let r = client.call(json!({"action": "stop_effect", "eident": eident}));
    assert_eq!(r["success"], true);
    let bus = provider.bus(1);
    let after_stop = bus.write_count();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(bus.write_count(), after_stop);

    let r = client.call(json!({"action": "get_effects"}));
    assert_eq!(r["running"], json!([]));
    daemon.shutdown().unwrap();
}

#[test]
fn device_fault_is_reported_not_fatal() {
    let (daemon, provider) = start();
    let mut client = Client::connect(&daemon);
    let (_, sid) = setup_stripe(&mut client);

    provider.bus(1).state().fail_writes = true;
    let r = client.call(json!({"action": "set_color", "ref": "f", "sid": sid,
                               "hsv": {"h": 0.0, "s": 1.0, "v": 1.0}}));
    assert_eq!(r["success"], false);
    assert_eq!(r["ref"], "f");

    provider.bus(1).state().fail_writes = false;
    let r = client.call(json!({"action": "set_color", "sid": sid,
                               "hsv": {"h": 0.0, "s": 1.0, "v": 1.0}}));
    assert_eq!(r["success"], true);
    daemon.shutdown().unwrap();
}

#[test]
fn add_controller_bus_open_failure() {
    let (daemon, provider) = start();
    provider.set_fail_open(true);
    let mut client = Client::connect(&daemon);
    let r = client.call(json!({
        "action": "add_controller", "channels": 16, "i2c_dev": 7, "address": 64
    }));
    assert_eq!(r["success"], false);
    assert!(r["message"].as_str().unwrap().contains("Failed to open I2C bus"));
    daemon.shutdown().unwrap();
}
