//! Effect scheduling: fade periodicity, tick serialization under client
//! load, and silence after stop.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ledd_lib::bus::mock::{MockBus, MockBusProvider};
use ledd_lib::bus::{self, BusProvider, I2cBus};
use ledd_lib::color::Hsv;
use ledd_lib::controller::ControllerConfig;
use ledd_lib::daemon::Daemon;
use ledd_lib::effect::{Effect, FADE_STEPS, FadeEffect};
use ledd_lib::runtime::{Runtime, RuntimeSettings};
use ledd_lib::store::MemoryStore;

const ADDR: u8 = 0x40;

fn settings(tick: Duration) -> RuntimeSettings {
    RuntimeSettings {
        tick_interval: tick,
        ..RuntimeSettings::default()
    }
}

fn config() -> ControllerConfig {
    ControllerConfig {
        bus_index: 1,
        address: ADDR,
        channels: 16,
    }
}

// ── Fade ──

#[test]
fn fade_has_period_20000() {
    let mut fade = FadeEffect::new();
    let first_cycle: Vec<Hsv> = (0..FADE_STEPS).map(|_| fade.advance()).collect();
    let second_cycle: Vec<Hsv> = (0..FADE_STEPS).map(|_| fade.advance()).collect();
    assert_eq!(first_cycle, second_cycle);

    // No shorter period: hues within one cycle are strictly increasing.
    for pair in first_cycle.windows(2) {
        assert!(pair[1].h > pair[0].h);
    }
    assert!(first_cycle.iter().all(|c| c.s == 1.0 && c.v == 1.0));
}

// ── Stop ──

#[test]
fn no_writes_after_stop() {
    let provider = MockBusProvider::new();
    let mut rt = Runtime::new(
        Box::new(MemoryStore::new()),
        Box::new(provider.clone()),
        settings(Duration::from_millis(100)),
    );
    let cid = rt.add_controller(config()).unwrap();
    let sid = rt.add_stripe(cid, "desk", true, [0, 1, 2], None).unwrap();

    let t0 = Instant::now();
    let eid = rt
        .start_effect("fade", Box::new(FadeEffect::new()), vec![sid], t0)
        .unwrap();
    let interval = rt.settings().tick_interval;
    for i in 0..5 {
        assert_eq!(rt.run_due_ticks(t0 + interval * i), 1);
    }
    let bus = provider.bus(1);
    assert!(bus.write_count() > 0);

    rt.stop_effect(eid).unwrap();
    let frozen = bus.write_count();
    let color = rt.color(sid).unwrap();
    for i in 5..50 {
        assert_eq!(rt.run_due_ticks(t0 + interval * i), 0);
    }
    assert_eq!(bus.write_count(), frozen);
    assert_eq!(rt.color(sid).unwrap(), color);
}

#[test]
fn stopping_one_stack_leaves_the_other_running() {
    let provider = MockBusProvider::new();
    let mut rt = Runtime::new(
        Box::new(MemoryStore::new()),
        Box::new(provider.clone()),
        settings(Duration::from_millis(100)),
    );
    let cid = rt.add_controller(config()).unwrap();
    let a = rt.add_stripe(cid, "a", true, [0, 1, 2], None).unwrap();
    let b = rt.add_stripe(cid, "b", true, [3, 4, 5], None).unwrap();

    let t0 = Instant::now();
    let ea = rt.start_effect("fade", Box::new(FadeEffect::new()), vec![a], t0).unwrap();
    rt.start_effect("fade", Box::new(FadeEffect::new()), vec![b], t0).unwrap();
    assert_eq!(rt.run_due_ticks(t0), 2);

    rt.stop_effect(ea).unwrap();
    let color_a = rt.color(a).unwrap();
    let interval = rt.settings().tick_interval;
    assert_eq!(rt.run_due_ticks(t0 + interval), 1);
    assert_eq!(rt.color(a).unwrap(), color_a);
    assert_ne!(rt.color(b).unwrap(), Hsv::new(0.0, 1.0, 1.0));
}

#[test]
fn last_writer_wins_on_shared_stripe() {
    let provider = MockBusProvider::new();
    let mut rt = Runtime::new(
        Box::new(MemoryStore::new()),
        Box::new(provider.clone()),
        settings(Duration::from_millis(100)),
    );
    let cid = rt.add_controller(config()).unwrap();
    let sid = rt.add_stripe(cid, "desk", true, [0, 1, 2], None).unwrap();
    let t0 = Instant::now();
    rt.start_effect("fade", Box::new(FadeEffect::new()), vec![sid], t0).unwrap();
    rt.run_due_ticks(t0);
    let fixed = Hsv::new(200.0, 0.3, 0.3);
    rt.set_color(sid, fixed).unwrap();
    assert_eq!(rt.color(sid).unwrap(), fixed);
    rt.run_due_ticks(t0 + rt.settings().tick_interval);
    assert_ne!(rt.color(sid).unwrap(), fixed);
}

// ── Serialization under load ──

/// Flags any bus operation that starts while another is in flight.
#[derive(Clone, Default)]
struct Probe {
    busy: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
    operations: Arc<AtomicUsize>,
}

impl Probe {
    fn enter(&self) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

struct ProbedBus {
    inner: MockBus,
    probe: Probe,
}

impl ProbedBus {
    fn guarded<T>(&mut self, op: impl FnOnce(&mut MockBus) -> T) -> T {
        self.probe.enter();
        // Widen the window so overlapping callers would collide.
        thread::sleep(Duration::from_micros(200));
        let out = op(&mut self.inner);
        self.probe.exit();
        out
    }
}

impl I2cBus for ProbedBus {
    fn write_byte(&mut self, address: u8, register: u8, value: u8) -> bus::Result<()> {
        self.guarded(|b| b.write_byte(address, register, value))
    }
    fn read_byte(&mut self, address: u8, register: u8) -> bus::Result<u8> {
        self.guarded(|b| b.read_byte(address, register))
    }
    fn write_word(&mut self, address: u8, register: u8, value: u16) -> bus::Result<()> {
        self.guarded(|b| b.write_word(address, register, value))
    }
    fn read_word(&mut self, address: u8, register: u8) -> bus::Result<u16> {
        self.guarded(|b| b.read_word(address, register))
    }
}

struct ProbedProvider {
    mock: MockBusProvider,
    probe: Probe,
}

impl BusProvider for ProbedProvider {
    fn open(&self, index: u8) -> bus::Result<Box<dyn I2cBus>> {
        Ok(Box::new(ProbedBus {
            inner: self.mock.bus(index),
            probe: self.probe.clone(),
        }))
    }
}

/// Effect that flags reentrant `advance` calls.
struct ProbedEffect {
    inner: FadeEffect,
    probe: Probe,
}

impl Effect for ProbedEffect {
    fn advance(&mut self) -> Hsv {
        self.probe.enter();
        thread::sleep(Duration::from_micros(200));
        let c = self.inner.advance();
        self.probe.exit();
        c
    }
}

fn request(stream: &mut TcpStream, reader: &mut BufReader<TcpStream>, line: &str) -> String {
    stream.write_all(line.as_bytes()).unwrap();
    stream.write_all(b"\n").unwrap();
    let mut reply = String::new();
    reader.read_line(&mut reply).unwrap();
    reply
}

#[test]
fn ticks_and_requests_never_overlap() {
    let probe = Probe::default();
    let provider = ProbedProvider {
        mock: MockBusProvider::new(),
        probe: probe.clone(),
    };
    let mut rt = Runtime::new(
        Box::new(MemoryStore::new()),
        Box::new(provider),
        settings(Duration::from_millis(1)),
    );
    let cid = rt.add_controller(config()).unwrap();
    let sids: Vec<u64> = (0..4)
        .map(|i| {
            let base = i * 3;
            rt.add_stripe(cid, &format!("s{i}"), true, [base, base + 1, base + 2], None)
                .unwrap()
        })
        .collect();
    let effect = ProbedEffect {
        inner: FadeEffect::new(),
        probe: probe.clone(),
    };
    rt.start_effect("probe", Box::new(effect), sids.clone(), Instant::now())
        .unwrap();
    // Second stack on overlapping stripes.
    rt.start_effect("fade", Box::new(FadeEffect::new()), sids[1..].to_vec(), Instant::now())
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let daemon = Daemon::start(listener, rt).unwrap();
    let addr = daemon.local_addr();

    let clients: Vec<_> = (0..4)
        .map(|c| {
            let sids = sids.clone();
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).unwrap();
                stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                for i in 0..25 {
                    let sid = sids[(c + i) % sids.len()];
                    let line = format!(
                        r#"{{"action":"set_color","ref":{i},"sid":{sid},"hsv":{{"h":{},"s":1,"v":1}}}}"#,
                        i * 10
                    );
                    let reply = request(&mut stream, &mut reader, &line);
                    assert!(reply.contains("\"success\":true"), "{reply}");
                }
            })
        })
        .collect();
    for c in clients {
        c.join().unwrap();
    }

    let rt = daemon.shutdown().unwrap();
    assert_eq!(rt.effects().count(), 0);
    assert!(probe.operations.load(Ordering::SeqCst) > 100);
    assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
}
