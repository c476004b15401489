use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thrustlink_core::bridge::{event_channel, EventReceiver, HubEvent, SerialStatusEvent};
use thrustlink_core::protocol::{
    CommunicationChannel, DecodedEvent, FrameBuilder, PacketType, ProtocolError,
};
use thrustlink_core::transport::{DriverConfig, DriverState, PortOpener, TransportDriver};

const WAIT: Duration = Duration::from_secs(5);

/// In-memory device: hands out scripted reads, then idles
struct ScriptedChannel {
    reads: VecDeque<io::Result<Vec<u8>>>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedChannel {
    fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
        Self {
            reads: reads.into(),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Read for ScriptedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reads.pop_front() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => {
                thread::sleep(Duration::from_millis(2));
                Err(io::Error::new(io::ErrorKind::TimedOut, "idle"))
            }
        }
    }
}

impl Write for ScriptedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CommunicationChannel for ScriptedChannel {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Finds a device once `present` is set and opens queued channels in order
struct ScriptedOpener {
    present: bool,
    channels: VecDeque<ScriptedChannel>,
    locates: Arc<AtomicUsize>,
}

impl ScriptedOpener {
    fn absent() -> Self {
        Self {
            present: false,
            channels: VecDeque::new(),
            locates: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_channels(channels: Vec<ScriptedChannel>) -> Self {
        Self {
            present: true,
            channels: channels.into(),
            locates: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl PortOpener for ScriptedOpener {
    fn locate(&mut self) -> Option<String> {
        self.locates.fetch_add(1, Ordering::SeqCst);
        self.present.then(|| "/dev/mock0".to_string())
    }

    fn open(&mut self, _path: &str) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        match self.channels.pop_front() {
            Some(channel) => Ok(Box::new(channel)),
            None => Err(ProtocolError::SerialError("no more devices".to_string())),
        }
    }
}

fn fast_config() -> DriverConfig {
    DriverConfig {
        port_path: Some("/dev/mock0".to_string()),
        absent_backoff: Duration::from_millis(1),
        failure_backoff: Duration::from_millis(1),
        absent_broadcast_limit: 2,
        ..DriverConfig::default()
    }
}

fn next_event(events: &mut EventReceiver) -> HubEvent {
    let deadline = Instant::now() + WAIT;
    loop {
        if let Some(event) = events.try_recv() {
            return event;
        }
        assert!(Instant::now() < deadline, "timed out waiting for event");
        thread::sleep(Duration::from_millis(1));
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        thread::sleep(Duration::from_millis(1));
    }
}

fn data_frame(ms: u32) -> Vec<u8> {
    FrameBuilder::new(PacketType::Data)
        .u32_le(ms)
        .f32_le(9.81)
        .byte(0)
        .build()
}

#[test]
fn test_absent_device_broadcasts_are_limited() {
    let opener = ScriptedOpener::absent();
    let locates = Arc::clone(&opener.locates);
    let (events, mut receiver) = event_channel();

    let handle = TransportDriver::spawn_with(fast_config(), opener, events).unwrap();
    wait_until(|| locates.load(Ordering::SeqCst) >= 10);

    assert!(!handle.status().connected());
    assert_eq!(
        handle.status().last_error(),
        Some(ProtocolError::DeviceAbsent.to_string())
    );
    handle.shutdown();

    let mut absent = 0;
    while let Some(event) = receiver.try_recv() {
        match event {
            HubEvent::SerialStatus(SerialStatusEvent {
                connected: false, ..
            }) => absent += 1,
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(absent, 2);
}

#[test]
fn test_connect_then_stream_data() {
    let mut bytes = b"boot\r\n".to_vec();
    bytes.extend(data_frame(1000));
    let frame2 = data_frame(2000);
    let channel = ScriptedChannel::new(vec![
        Ok(bytes),
        Ok(frame2[..5].to_vec()),
        Ok(frame2[5..].to_vec()),
    ]);
    let (events, mut receiver) = event_channel();
    let handle =
        TransportDriver::spawn_with(fast_config(), ScriptedOpener::with_channels(vec![channel]), events)
            .unwrap();

    assert_eq!(
        next_event(&mut receiver),
        HubEvent::SerialStatus(SerialStatusEvent::connected("/dev/mock0", 921_600))
    );

    for expected in [1.0, 2.0] {
        match next_event(&mut receiver) {
            HubEvent::Device(DecodedEvent::Data(reading)) => assert_eq!(reading.time_s, expected),
            other => panic!("expected data, got {:?}", other),
        }
    }

    assert!(handle.status().connected());
    assert_eq!(handle.state(), DriverState::Connected);
    handle.shutdown();
}

#[test]
fn test_io_error_reconnects() {
    let broken = ScriptedChannel::new(vec![Err(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "unplugged",
    ))]);
    let replacement = ScriptedChannel::new(vec![Ok(data_frame(42))]);
    let opener = ScriptedOpener::with_channels(vec![broken, replacement]);
    let (events, mut receiver) = event_channel();
    let handle = TransportDriver::spawn_with(fast_config(), opener, events).unwrap();

    assert!(matches!(
        next_event(&mut receiver),
        HubEvent::SerialStatus(SerialStatusEvent { connected: true, .. })
    ));
    match next_event(&mut receiver) {
        HubEvent::SerialStatus(SerialStatusEvent {
            connected: false,
            error: Some(error),
            ..
        }) => assert!(error.starts_with("Serial communication error"), "{}", error),
        other => panic!("expected disconnect, got {:?}", other),
    }
    assert!(matches!(
        next_event(&mut receiver),
        HubEvent::SerialStatus(SerialStatusEvent { connected: true, .. })
    ));
    assert!(matches!(
        next_event(&mut receiver),
        HubEvent::Device(DecodedEvent::Data(_))
    ));
    handle.shutdown();
}

#[test]
fn test_writer_requires_open_port() {
    let (events, _receiver) = event_channel();
    let handle =
        TransportDriver::spawn_with(fast_config(), ScriptedOpener::absent(), events).unwrap();

    let frame = FrameBuilder::new(PacketType::Tare).u16_le(0).build();
    assert!(matches!(
        handle.writer().write_frame(&frame),
        Err(ProtocolError::NotConnected)
    ));
    handle.shutdown();
}

#[test]
fn test_writer_reaches_device_while_connected() {
    let channel = ScriptedChannel::new(Vec::new());
    let written = Arc::clone(&channel.written);
    let (events, mut receiver) = event_channel();
    let handle =
        TransportDriver::spawn_with(fast_config(), ScriptedOpener::with_channels(vec![channel]), events)
            .unwrap();
    next_event(&mut receiver);

    let frame = FrameBuilder::new(PacketType::GetConfig).u16_le(0).build();
    handle.writer().write_frame(&frame).unwrap();
    assert_eq!(*written.lock(), frame);
    handle.shutdown();
}

#[test]
fn test_shutdown_interrupts_backoff() {
    let config = DriverConfig {
        absent_backoff: Duration::from_secs(30),
        ..fast_config()
    };
    let opener = ScriptedOpener::absent();
    let locates = Arc::clone(&opener.locates);
    let (events, _receiver) = event_channel();
    let handle = TransportDriver::spawn_with(config, opener, events).unwrap();
    wait_until(|| locates.load(Ordering::SeqCst) >= 1);

    let started = Instant::now();
    handle.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_driver_stops_when_hub_is_gone() {
    let opener = ScriptedOpener::absent();
    let locates = Arc::clone(&opener.locates);
    let (events, receiver) = event_channel();
    drop(receiver);

    let handle = TransportDriver::spawn_with(fast_config(), opener, events).unwrap();
    wait_until(|| locates.load(Ordering::SeqCst) >= 1);
    thread::sleep(Duration::from_millis(50));

    // The first failed publish ends the loop
    assert_eq!(locates.load(Ordering::SeqCst), 1);
    handle.shutdown();
}
