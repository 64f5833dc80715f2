//! In-memory card for tests and benchmarks
//!
//! A [`SimCard`] speaks the same control protocol as the hardware:
//!
//! - PR-begin arms the reconfiguration port for one slot; the image streamed
//!   there sets the slot's personality from its header
//! - tie-io frames set the slot's transfer size
//! - a go frame starts a new run and clears any completion the host left
//!   unread; an output read blocks until the inputs of that run have
//!   arrived, computes the result and latches a completion frame
//! - a control read takes the latched completion, so a card holds at most
//!   one no matter how many of its slots took part in the batch
//!
//! Every stream call is appended to an event log so tests can check the
//! order in which the runtime touched the card. Faults can be injected per
//! port.

use super::{CardDriver, CardProvider, CardCriteria, DriverError, DriverResult, StreamHandle};
use crate::catalog::{Bitstream, FunctionType, ReconfigCatalog};
use crate::config::{defaults, VmConfig};
use crate::frame::{slot_tag, ControlFrame, FrameKind, FILLER, FRAME_BYTES};
use crate::topology::{Port, PortLayout};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// First word of every synthetic image
pub const IMAGE_MAGIC: u32 = 0x5641_4D49;

const IMAGE_HEADER_WORDS: usize = 3;
const DONE: u32 = 0xE000_0000;
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// Completion frame queued after a run's output was read
pub const fn done_frame(slot: u8) -> ControlFrame {
    ControlFrame([DONE | slot_tag(slot), FILLER, FILLER, FILLER])
}

/// Image that turns `slot` into `function` on a simulated card
///
/// Header words are `[IMAGE_MAGIC, code, slot]`, followed by a filler
/// payload whose length depends on the slot.
pub fn synthetic_image(function: FunctionType, slot: u8) -> Bitstream {
    let header = [IMAGE_MAGIC, function.code() as u32, slot as u32];
    let mut image: Vec<u8> = bytemuck::cast_slice(&header).to_vec();
    image.extend((0..256 + slot as usize * 16).map(|i| (i as u8) ^ (function.code() as u8)));
    Bitstream::from(image)
}

/// Catalog with a synthetic image for every function on every slot
pub fn synthetic_catalog(slots: u8, functions: &[FunctionType]) -> ReconfigCatalog {
    let mut catalog = ReconfigCatalog::new();
    for &function in functions {
        for slot in 0..slots {
            catalog.insert(function, slot, synthetic_image(function, slot));
        }
    }
    catalog
}

/// Observable card activity, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    StreamOpened { port: u32, stream: StreamHandle },
    StreamClosed { port: u32, stream: StreamHandle },
    Control(ControlFrame),
    Image { slot: u8, function: FunctionType, bytes: usize },
    Write { port: u32, bytes: usize },
    Read { port: u32, bytes: usize },
    Fault { port: u32, code: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Control,
    Reconfig,
    Data { slot: u8, port: Port },
}

#[derive(Debug, Default)]
struct SlotState {
    personality: Option<FunctionType>,
    transfer_size: u32,
    ready: bool,
    runs: u64,
    in_a: Option<Vec<i32>>,
    in_b: Option<Vec<i32>>,
    fresh_a: bool,
    fresh_b: bool,
    image_writes: usize,
    completed: usize,
}

impl SlotState {
    fn inputs_ready(&self) -> bool {
        match self.personality {
            Some(function) if arity(function) == 1 => self.fresh_a,
            Some(_) => self.fresh_a && self.fresh_b,
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    next_stream: u32,
    streams: HashMap<StreamHandle, u32>,
    slots: Vec<SlotState>,
    reconfiguring: Option<u8>,
    completion: Option<ControlFrame>,
    faults: HashMap<u32, i32>,
    bitfile: Option<PathBuf>,
    events: Vec<SimEvent>,
}

/// Simulated accelerator card
pub struct SimCard {
    id: usize,
    slots: u8,
    control_port: u32,
    reconfig_port: u32,
    layout: PortLayout,
    io_timeout: Duration,
    state: Mutex<SimState>,
    changed: Condvar,
}

impl SimCard {
    /// Card with `slots` slots on the default port layout
    pub fn new(id: usize, slots: u8) -> Self {
        Self::with_ports(
            id,
            slots,
            defaults::CONTROL_PORT,
            defaults::RECONFIG_PORT,
            PortLayout::new(defaults::DATA_PORT_BASE, defaults::DATA_PORT_STRIDE),
        )
    }

    /// Card matching a runtime configuration
    pub fn from_config(id: usize, config: &VmConfig) -> Self {
        Self::with_ports(
            id,
            config.slots_per_card,
            config.control_port,
            config.reconfig_port,
            config.port_layout(),
        )
    }

    fn with_ports(id: usize, slots: u8, control_port: u32, reconfig_port: u32, layout: PortLayout) -> Self {
        let state = SimState {
            next_stream: 1,
            slots: (0..slots).map(|_| SlotState::default()).collect(),
            ..SimState::default()
        };
        Self {
            id,
            slots,
            control_port,
            reconfig_port,
            layout,
            io_timeout: DEFAULT_IO_TIMEOUT,
            state: Mutex::new(state),
            changed: Condvar::new(),
        }
    }

    /// How long blocking reads wait before failing with a timeout
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Make every read and write on `port` fail with `code`
    pub fn inject_fault(&self, port: u32, code: i32) {
        self.state.lock().faults.insert(port, code);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Copy of the event log
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    /// Drain the event log
    pub fn take_events(&self) -> Vec<SimEvent> {
        std::mem::take(&mut self.state.lock().events)
    }

    /// Control frames received, in order
    pub fn control_frames(&self) -> Vec<ControlFrame> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Control(frame) => Some(*frame),
                _ => None,
            })
            .collect()
    }

    /// Number of images streamed into `slot`
    pub fn image_writes(&self, slot: u8) -> usize {
        self.with_slot(slot, |s| s.image_writes).unwrap_or(0)
    }

    /// Personality currently configured on `slot`
    pub fn personality(&self, slot: u8) -> Option<FunctionType> {
        self.with_slot(slot, |s| s.personality).flatten()
    }

    /// Transfer size announced by the last tie-io frame for `slot`
    pub fn transfer_size(&self, slot: u8) -> Option<u32> {
        self.with_slot(slot, |s| s.ready.then_some(s.transfer_size)).flatten()
    }

    /// Most recent data written to an input port of `slot`
    pub fn last_input(&self, slot: u8, port: Port) -> Option<Vec<i32>> {
        self.with_slot(slot, |s| match port {
            Port::InputA => s.in_a.clone(),
            Port::InputB => s.in_b.clone(),
            Port::Output => None,
        })
        .flatten()
    }

    /// Runs whose output has been read on `slot`
    pub fn completed_runs(&self, slot: u8) -> usize {
        self.with_slot(slot, |s| s.completed).unwrap_or(0)
    }

    /// Go frames received for `slot`
    pub fn runs_started(&self, slot: u8) -> u64 {
        self.with_slot(slot, |s| s.runs).unwrap_or(0)
    }

    /// Completion frames not yet read by the host, at most one
    pub fn pending_responses(&self) -> usize {
        usize::from(self.state.lock().completion.is_some())
    }

    /// Streams currently open
    pub fn open_streams(&self) -> usize {
        self.state.lock().streams.len()
    }

    /// Static bit file this card was programmed with
    pub fn bitfile(&self) -> Option<PathBuf> {
        self.state.lock().bitfile.clone()
    }

    fn with_slot<T>(&self, slot: u8, f: impl FnOnce(&SlotState) -> T) -> Option<T> {
        self.state.lock().slots.get(slot as usize).map(f)
    }

    fn role(&self, port: u32) -> Option<Role> {
        if port == self.control_port {
            return Some(Role::Control);
        }
        if port == self.reconfig_port {
            return Some(Role::Reconfig);
        }
        (0..self.slots).find_map(|slot| {
            self.layout
                .ports_for(slot)
                .role_of(port)
                .map(|port| Role::Data { slot, port })
        })
    }

    fn port_of(state: &SimState, stream: StreamHandle) -> DriverResult<u32> {
        state
            .streams
            .get(&stream)
            .copied()
            .ok_or_else(|| DriverError::new(DriverError::INVALID_STREAM, format!("{stream} is not open")))
    }

    fn check_fault(state: &mut SimState, port: u32) -> DriverResult<()> {
        if let Some(&code) = state.faults.get(&port) {
            state.events.push(SimEvent::Fault { port, code });
            return Err(DriverError::new(code, format!("injected fault on port {port}")));
        }
        Ok(())
    }

    fn apply_frame(state: &mut SimState, frame: ControlFrame) -> DriverResult<()> {
        state.events.push(SimEvent::Control(frame));

        let (kind, slot) = match (frame.kind(), frame.slot()) {
            (Some(kind), Some(slot)) if (slot as usize) < state.slots.len() => (kind, slot),
            _ => return Err(protocol(format!("unexpected control frame {frame:?}"))),
        };

        match kind {
            FrameKind::PrBegin => state.reconfiguring = Some(slot),
            FrameKind::PrEnd => state.reconfiguring = None,
            FrameKind::TieIo => {
                let slot_state = &mut state.slots[slot as usize];
                slot_state.transfer_size = frame.transfer_size().unwrap_or(0);
                slot_state.ready = true;
            }
            FrameKind::Go => {
                state.completion = None;
                let slot_state = &mut state.slots[slot as usize];
                slot_state.runs += 1;
                slot_state.fresh_a = false;
                slot_state.fresh_b = false;
            }
        }
        Ok(())
    }

    fn apply_image(state: &mut SimState, data: &[u8]) -> DriverResult<()> {
        let slot = state
            .reconfiguring
            .ok_or_else(|| protocol("image written without PR-begin"))?;

        let header: Vec<u32> = data
            .chunks_exact(4)
            .take(IMAGE_HEADER_WORDS)
            .map(bytemuck::pod_read_unaligned::<u32>)
            .collect();
        let function = match header.as_slice() {
            [IMAGE_MAGIC, code, image_slot] => {
                if *image_slot != slot as u32 {
                    return Err(protocol(format!(
                        "image built for slot {image_slot} streamed into slot {slot}"
                    )));
                }
                FunctionType::from_code(*code as u16)
                    .ok_or_else(|| protocol(format!("unknown function code {code}")))?
            }
            _ => return Err(protocol("image header not recognised")),
        };

        let slot_state = &mut state.slots[slot as usize];
        slot_state.personality = Some(function);
        slot_state.image_writes += 1;
        state.events.push(SimEvent::Image {
            slot,
            function,
            bytes: data.len(),
        });
        Ok(())
    }

    /// Block until `ready` holds or the I/O timeout passes
    fn wait_for(
        &self,
        state: &mut parking_lot::MutexGuard<'_, SimState>,
        what: &str,
        ready: impl Fn(&SimState) -> bool,
    ) -> DriverResult<()> {
        let deadline = Instant::now() + self.io_timeout;
        while !ready(&**state) {
            if self.changed.wait_until(state, deadline).timed_out() && !ready(&**state) {
                return Err(DriverError::new(
                    DriverError::TIMEOUT,
                    format!("timed out waiting for {what}"),
                ));
            }
        }
        Ok(())
    }
}

impl CardDriver for SimCard {
    fn create_stream(&self, port: u32) -> DriverResult<StreamHandle> {
        if self.role(port).is_none() {
            return Err(DriverError::new(
                DriverError::INVALID_PORT,
                format!("port {port} does not exist on sim-card-{}", self.id),
            ));
        }
        let mut state = self.state.lock();
        let stream = StreamHandle(state.next_stream);
        state.next_stream += 1;
        state.streams.insert(stream, port);
        state.events.push(SimEvent::StreamOpened { port, stream });
        Ok(stream)
    }

    fn close_stream(&self, stream: StreamHandle) -> DriverResult<()> {
        let mut state = self.state.lock();
        let port = state
            .streams
            .remove(&stream)
            .ok_or_else(|| DriverError::new(DriverError::INVALID_STREAM, format!("{stream} is not open")))?;
        state.events.push(SimEvent::StreamClosed { port, stream });
        Ok(())
    }

    fn write_stream(&self, stream: StreamHandle, data: &[u8]) -> DriverResult<usize> {
        let mut state = self.state.lock();
        let port = Self::port_of(&state, stream)?;
        Self::check_fault(&mut state, port)?;

        match self.role(port) {
            Some(Role::Control) => {
                if data.len() % FRAME_BYTES != 0 {
                    return Err(protocol(format!("{} bytes is not a whole number of frames", data.len())));
                }
                for chunk in data.chunks_exact(FRAME_BYTES) {
                    if let Some(frame) = ControlFrame::from_bytes(chunk) {
                        Self::apply_frame(&mut state, frame)?;
                    }
                }
            }
            Some(Role::Reconfig) => Self::apply_image(&mut state, data)?,
            Some(Role::Data { slot, port: role }) => {
                state.events.push(SimEvent::Write { port, bytes: data.len() });
                let words: Vec<i32> = data.chunks_exact(4).map(bytemuck::pod_read_unaligned::<i32>).collect();
                let slot_state = &mut state.slots[slot as usize];
                match role {
                    Port::InputA => {
                        slot_state.in_a = Some(words);
                        slot_state.fresh_a = true;
                    }
                    Port::InputB => {
                        slot_state.in_b = Some(words);
                        slot_state.fresh_b = true;
                    }
                    Port::Output => return Err(protocol(format!("port {port} is an output"))),
                }
            }
            None => return Err(DriverError::new(DriverError::INVALID_PORT, format!("port {port}"))),
        }

        self.changed.notify_all();
        Ok(data.len())
    }

    fn read_stream(&self, stream: StreamHandle, buf: &mut [u8]) -> DriverResult<usize> {
        let mut state = self.state.lock();
        let port = Self::port_of(&state, stream)?;
        Self::check_fault(&mut state, port)?;
        state.events.push(SimEvent::Read { port, bytes: buf.len() });

        match self.role(port) {
            Some(Role::Control) => {
                self.wait_for(&mut state, "a control response", |s| s.completion.is_some())?;
                let frame = state
                    .completion
                    .take()
                    .ok_or_else(|| protocol("completion taken concurrently"))?;
                let bytes = frame.as_bytes();
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Role::Data {
                slot,
                port: Port::Output,
            }) => {
                let index = slot as usize;
                self.wait_for(&mut state, "input data", |s| s.slots[index].inputs_ready())?;

                let slot_state = &mut state.slots[index];
                let function = slot_state
                    .personality
                    .ok_or_else(|| protocol(format!("slot {slot} has no personality")))?;
                let a = slot_state.in_a.as_deref().unwrap_or_default();
                let b = slot_state.in_b.as_deref().unwrap_or_default();
                let result = compute(function, a, b, buf.len() / 4)?;
                slot_state.completed += 1;

                for (chunk, value) in buf.chunks_exact_mut(4).zip(&result) {
                    chunk.copy_from_slice(&value.to_ne_bytes());
                }
                state.completion = Some(done_frame(slot));
                self.changed.notify_all();
                Ok(result.len() * 4)
            }
            Some(_) => Err(protocol(format!("port {port} is not readable"))),
            None => Err(DriverError::new(DriverError::INVALID_PORT, format!("port {port}"))),
        }
    }

    fn describe(&self) -> String {
        format!("sim-card-{}", self.id)
    }
}

fn protocol(message: impl Into<String>) -> DriverError {
    DriverError::new(DriverError::PROTOCOL, message)
}

fn arity(function: FunctionType) -> usize {
    match function {
        FunctionType::VReduce => 1,
        _ => 2,
    }
}

fn compute(function: FunctionType, a: &[i32], b: &[i32], items: usize) -> DriverResult<Vec<i32>> {
    let at = |v: &[i32], i: usize| v.get(i).copied().unwrap_or(0);
    let elementwise = |op: fn(i32, i32) -> i32| (0..items).map(|i| op(at(a, i), at(b, i))).collect::<Vec<_>>();
    let reduced = |sum: i32| {
        let mut out = vec![0; items];
        if let Some(first) = out.first_mut() {
            *first = sum;
        }
        out
    };
    let pairs = || (0..a.len().max(b.len())).map(move |i| (at(a, i), at(b, i)));

    Ok(match function {
        FunctionType::VAdd => elementwise(i32::wrapping_add),
        FunctionType::VSub => elementwise(i32::wrapping_sub),
        FunctionType::VMul => elementwise(i32::wrapping_mul),
        FunctionType::VReduce => reduced(a.iter().fold(0i32, |acc, x| acc.wrapping_add(*x))),
        FunctionType::VAddReduce => reduced(pairs().fold(0i32, |acc, (x, y)| acc.wrapping_add(x.wrapping_add(y)))),
        FunctionType::VSubReduce => reduced(pairs().fold(0i32, |acc, (x, y)| acc.wrapping_add(x.wrapping_sub(y)))),
        other => return Err(protocol(format!("{other} is not simulated"))),
    })
}

/// Hands out pre-built simulated cards
pub struct SimProvider {
    model: u32,
    cards: Mutex<VecDeque<Arc<SimCard>>>,
}

impl SimProvider {
    pub fn new(cards: impl IntoIterator<Item = Arc<SimCard>>) -> Self {
        Self {
            model: defaults::CARD_MODEL,
            cards: Mutex::new(cards.into_iter().collect()),
        }
    }

    /// Model number the cards answer discovery with
    pub fn with_model(mut self, model: u32) -> Self {
        self.model = model;
        self
    }

    fn next_card(&self) -> DriverResult<Arc<SimCard>> {
        self.cards
            .lock()
            .pop_front()
            .ok_or_else(|| DriverError::new(DriverError::NOT_FOUND, "no simulated cards left"))
    }
}

impl CardProvider for SimProvider {
    fn discover(&self, criteria: &CardCriteria) -> DriverResult<Arc<dyn CardDriver>> {
        if criteria.model != self.model {
            return Err(DriverError::new(
                DriverError::NOT_FOUND,
                format!("no card with model {:#x}", criteria.model),
            ));
        }
        let card: Arc<dyn CardDriver> = self.next_card()?;
        Ok(card)
    }

    fn load_bitfile(&self, path: &Path) -> DriverResult<Arc<dyn CardDriver>> {
        let card = self.next_card()?;
        card.state.lock().bitfile = Some(path.to_path_buf());
        Ok(card)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::CardDriverExt;

    fn open(card: &SimCard, port: u32) -> StreamHandle {
        card.create_stream(port).unwrap()
    }

    fn send(card: &SimCard, control: StreamHandle, frame: ControlFrame) {
        card.write_all(control, frame.as_bytes()).unwrap();
    }

    #[test]
    fn test_image_sets_personality() {
        let card = SimCard::new(0, 2);
        let control = open(&card, 50);
        let icap = open(&card, 100);

        send(&card, control, ControlFrame::pr_begin(1));
        card.write_all(icap, synthetic_image(FunctionType::VSub, 1).bytes())
            .unwrap();
        send(&card, control, ControlFrame::pr_end(1));

        assert_eq!(card.personality(1), Some(FunctionType::VSub));
        assert_eq!(card.image_writes(1), 1);
        assert_eq!(card.personality(0), None);
    }

    #[test]
    fn test_image_for_wrong_slot_is_rejected() {
        let card = SimCard::new(0, 2);
        let control = open(&card, 50);
        let icap = open(&card, 100);

        send(&card, control, ControlFrame::pr_begin(0));
        let err = card
            .write_all(icap, synthetic_image(FunctionType::VAdd, 1).bytes())
            .unwrap_err();
        assert_eq!(err.code, DriverError::PROTOCOL);
    }

    #[test]
    fn test_image_without_pr_begin_is_rejected() {
        let card = SimCard::new(0, 1);
        let icap = open(&card, 100);
        assert!(card.write_all(icap, synthetic_image(FunctionType::VAdd, 0).bytes()).is_err());
    }

    #[test]
    fn test_output_read_computes_and_acknowledges() {
        let card = SimCard::new(0, 1);
        let control = open(&card, 50);
        let icap = open(&card, 100);
        let (a, b, out) = (open(&card, 11), open(&card, 12), open(&card, 13));

        send(&card, control, ControlFrame::pr_begin(0));
        card.write_all(icap, synthetic_image(FunctionType::VMul, 0).bytes()).unwrap();
        send(&card, control, ControlFrame::pr_end(0));
        send(&card, control, ControlFrame::tie_io(0, 3));
        send(&card, control, ControlFrame::go(0));

        card.write_all(a, bytemuck::cast_slice(&[2i32, 3, 4])).unwrap();
        card.write_all(b, bytemuck::cast_slice(&[5i32, 6, 7])).unwrap();

        let mut result = [0i32; 3];
        card.read_exact(out, bytemuck::cast_slice_mut(&mut result)).unwrap();
        assert_eq!(result, [10, 18, 28]);
        assert_eq!(card.transfer_size(0), Some(3));
        assert_eq!(card.pending_responses(), 1);

        let mut ack = [0u8; FRAME_BYTES];
        card.read_exact(control, &mut ack).unwrap();
        assert_eq!(ControlFrame::from_bytes(&ack), Some(done_frame(0)));
    }

    #[test]
    fn test_completion_is_latched_once_per_card() {
        let card = SimCard::new(0, 2);
        let control = open(&card, 50);
        let icap = open(&card, 100);
        for slot in 0..2 {
            send(&card, control, ControlFrame::pr_begin(slot));
            card.write_all(icap, synthetic_image(FunctionType::VAdd, slot).bytes()).unwrap();
            send(&card, control, ControlFrame::pr_end(slot));
            send(&card, control, ControlFrame::tie_io(slot, 1));
        }

        let run = |slot: u8| {
            let base = 11 + 10 * slot as u32;
            let (a, b, out) = (open(&card, base), open(&card, base + 1), open(&card, base + 2));
            card.write_all(a, bytemuck::cast_slice(&[1i32])).unwrap();
            card.write_all(b, bytemuck::cast_slice(&[2i32])).unwrap();
            let mut result = [0i32; 1];
            card.read_exact(out, bytemuck::cast_slice_mut(&mut result)).unwrap();
            assert_eq!(result, [3]);
        };

        for _ in 0..3 {
            send(&card, control, ControlFrame::go(0));
            send(&card, control, ControlFrame::go(1));
            run(0);
            run(1);
            assert_eq!(card.pending_responses(), 1);

            let mut ack = [0u8; FRAME_BYTES];
            card.read_exact(control, &mut ack).unwrap();
            assert_eq!(ControlFrame::from_bytes(&ack), Some(done_frame(1)));
            assert_eq!(card.pending_responses(), 0);
        }

        // an unread completion does not outlive the next go frame
        send(&card, control, ControlFrame::go(0));
        run(0);
        assert_eq!(card.pending_responses(), 1);
        send(&card, control, ControlFrame::go(0));
        assert_eq!(card.pending_responses(), 0);
    }

    #[test]
    fn test_output_read_times_out_without_inputs() {
        let card = SimCard::new(0, 1).with_io_timeout(Duration::from_millis(20));
        let control = open(&card, 50);
        let icap = open(&card, 100);
        let out = open(&card, 13);

        send(&card, control, ControlFrame::pr_begin(0));
        card.write_all(icap, synthetic_image(FunctionType::VAdd, 0).bytes()).unwrap();
        send(&card, control, ControlFrame::pr_end(0));
        send(&card, control, ControlFrame::go(0));

        let err = card.read_exact(out, &mut [0u8; 16]).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_injected_fault_fails_port() {
        let card = SimCard::new(0, 1);
        let a = open(&card, 11);
        card.inject_fault(11, DriverError::IO);
        let err = card.write_all(a, &[0u8; 4]).unwrap_err();
        assert_eq!(err.code, DriverError::IO);
        assert!(card.events().contains(&SimEvent::Fault {
            port: 11,
            code: DriverError::IO
        }));

        card.clear_faults();
        assert!(card.write_all(a, &[0u8; 4]).is_ok());
    }

    #[test]
    fn test_reductions() {
        assert_eq!(compute(FunctionType::VReduce, &[1, 2, 3], &[], 2).unwrap(), vec![6, 0]);
        assert_eq!(compute(FunctionType::VAddReduce, &[1, 2], &[3, 4], 1).unwrap(), vec![10]);
        assert_eq!(compute(FunctionType::VSubReduce, &[5, 5], &[1, 2], 1).unwrap(), vec![7]);
        assert!(compute(FunctionType::SqlAvg, &[1], &[1], 1).is_err());
    }

    #[test]
    fn test_unknown_port_and_stream() {
        let card = SimCard::new(0, 1);
        assert_eq!(card.create_stream(23).unwrap_err().code, DriverError::INVALID_PORT);
        assert_eq!(
            card.close_stream(StreamHandle(99)).unwrap_err().code,
            DriverError::INVALID_STREAM
        );
    }

    #[test]
    fn test_provider_discovers_by_model() {
        let provider = SimProvider::new([Arc::new(SimCard::new(0, 1)), Arc::new(SimCard::new(1, 1))]);
        assert!(provider.discover(&CardCriteria { model: 0x123 }).is_err());

        let first = provider.discover(&CardCriteria { model: defaults::CARD_MODEL }).unwrap();
        assert_eq!(first.describe(), "sim-card-0");
        let second = provider.load_bitfile(Path::new("static.bit")).unwrap();
        assert_eq!(second.describe(), "sim-card-1");
        assert!(provider.discover(&CardCriteria { model: defaults::CARD_MODEL }).is_err());
    }
}
