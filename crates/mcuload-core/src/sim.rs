//! In-process stand-in for the device firmware.
//!
//! Implements the device side of the protocol closely enough to exercise the
//! loader end to end: it keeps the declaration tables, insists on dense method
//! indices and on declare-before-execute, and can be given a memory capacity.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use mcuload_contracts::WIRE_PROTOCOL_VERSION;

use crate::channel::{read_frame, write_frame, Channel, ChannelError};
use crate::estimate::{
    ARGUMENT_SLOT_BYTES, CLASS_OVERHEAD_BYTES, MEMBER_SLOT_BYTES, METHOD_OVERHEAD_BYTES,
    REMAP_ENTRY_BYTES,
};
use crate::wire::{ClassFrame, Fault, MethodFrame, NakStatus, Reply, Request};
use crate::{Token, TokenSpace};

#[derive(Debug, Default)]
pub struct SimulatedDevice {
    capacity: Option<u64>,
    completion_value: i32,
    cleared: bool,
    used: u64,
    classes: BTreeMap<Token, ClassFrame>,
    methods: Vec<MethodFrame>,
    method_slot: BTreeMap<Token, usize>,
    entry: Option<(Token, u32)>,
    next_handle: u32,
    executed: Vec<Token>,
    requests: Vec<Request>,
    pending: Option<Vec<u8>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects declarations once `bytes` would be exceeded.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Value every invoked task completes with.
    pub fn with_completion_value(mut self, value: i32) -> Self {
        self.completion_value = value;
        self
    }

    /// Well-formed requests received since the last accepted clear (that clear
    /// included), in arrival order.
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    /// Method tokens executed as static constructors since the last clear.
    pub fn executed(&self) -> &[Token] {
        &self.executed
    }

    pub fn memory_used(&self) -> u64 {
        self.used
    }

    pub fn class(&self, token: Token) -> Option<&ClassFrame> {
        self.classes.get(&token)
    }

    pub fn method(&self, token: Token) -> Option<&MethodFrame> {
        self.method_slot.get(&token).map(|&i| &self.methods[i])
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    /// Handles one encoded request and returns the encoded reply.
    pub fn handle(&mut self, message: &[u8]) -> Vec<u8> {
        let reply = match Request::decode(message) {
            Ok(req) => {
                let reply = self.apply(&req);
                self.requests.push(req);
                reply
            }
            Err(err) => {
                tracing::debug!(%err, "simulated device got a malformed request");
                nak(NakStatus::Malformed, None)
            }
        };
        reply.encode()
    }

    fn apply(&mut self, req: &Request) -> Reply {
        if let Request::Clear { protocol } = req {
            if *protocol != WIRE_PROTOCOL_VERSION {
                return nak(NakStatus::Unsupported, None);
            }
            self.reset();
            return Reply::Ack;
        }
        if !self.cleared {
            return nak(NakStatus::NotReady, None);
        }
        match req {
            Request::Clear { .. } => Reply::Ack,
            Request::DeclareClass(c) => self.declare_class(c),
            Request::DeclareMethod(m) => self.declare_method(m),
            Request::ResolveEntryPoint { token } => {
                if !self.method_slot.contains_key(token) {
                    return nak(NakStatus::UnknownToken, fault(TokenSpace::Method, *token));
                }
                self.next_handle += 1;
                self.entry = Some((*token, self.next_handle));
                Reply::Handle {
                    token: *token,
                    handle: self.next_handle,
                }
            }
            Request::Execute { token } => {
                if self.entry.is_none() {
                    return nak(NakStatus::NotReady, None);
                }
                if !self.method_slot.contains_key(token) {
                    return nak(NakStatus::UnknownToken, fault(TokenSpace::Method, *token));
                }
                self.executed.push(*token);
                Reply::Ack
            }
            Request::Invoke { handle } => match self.entry {
                Some((_, h)) if h == *handle => Reply::Completed {
                    value: self.completion_value,
                },
                _ => nak(NakStatus::NotReady, None),
            },
        }
    }

    fn declare_class(&mut self, c: &ClassFrame) -> Reply {
        if !self.methods.is_empty() {
            return nak(NakStatus::OutOfOrder, fault(TokenSpace::Type, c.token));
        }
        if self.classes.contains_key(&c.token) {
            return nak(NakStatus::OutOfOrder, fault(TokenSpace::Type, c.token));
        }
        let cost = CLASS_OVERHEAD_BYTES
            + u64::from(c.static_size)
            + MEMBER_SLOT_BYTES * c.members.len() as u64;
        if !self.reserve(cost) {
            return nak(NakStatus::OutOfMemory, fault(TokenSpace::Type, c.token));
        }
        self.classes.insert(c.token, c.clone());
        Reply::Ack
    }

    fn declare_method(&mut self, m: &MethodFrame) -> Reply {
        if self.entry.is_some()
            || usize::from(m.index) != self.methods.len()
            || self.method_slot.contains_key(&m.token)
        {
            return nak(NakStatus::OutOfOrder, fault(TokenSpace::Method, m.token));
        }
        let cost = METHOD_OVERHEAD_BYTES
            + ARGUMENT_SLOT_BYTES * u64::from(m.arg_count)
            + REMAP_ENTRY_BYTES * m.remap.len() as u64
            + m.code.len() as u64;
        if !self.reserve(cost) {
            return nak(NakStatus::OutOfMemory, fault(TokenSpace::Method, m.token));
        }
        self.method_slot.insert(m.token, self.methods.len());
        self.methods.push(m.clone());
        Reply::Ack
    }

    fn reserve(&mut self, bytes: u64) -> bool {
        let next = self.used.saturating_add(bytes);
        if self.capacity.is_some_and(|cap| next > cap) {
            return false;
        }
        self.used = next;
        true
    }

    fn reset(&mut self) {
        self.cleared = true;
        self.used = 0;
        self.classes.clear();
        self.methods.clear();
        self.method_slot.clear();
        self.entry = None;
        self.executed.clear();
        self.requests.clear();
    }
}

impl Channel for SimulatedDevice {
    fn send(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        let reply = self.handle(message);
        self.pending = Some(reply);
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        self.pending.take().ok_or(ChannelError::Closed)
    }
}

/// Serves framed requests from `reader` until EOF, echoing each sequence number.
pub fn serve(
    device: &mut SimulatedDevice,
    reader: &mut impl Read,
    writer: &mut impl Write,
) -> Result<(), ChannelError> {
    while let Some((seq, payload)) = read_frame(reader)? {
        let reply = device.handle(&payload);
        write_frame(writer, seq, &reply)?;
    }
    Ok(())
}

fn nak(status: NakStatus, fault: Option<Fault>) -> Reply {
    Reply::Nak { status, fault }
}

fn fault(space: TokenSpace, token: Token) -> Option<Fault> {
    Some(Fault { space, token })
}
