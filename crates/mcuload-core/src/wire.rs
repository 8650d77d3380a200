//! Request/reply encoding spoken to the device firmware.
//!
//! Every message starts with a one-byte opcode; integers are little-endian;
//! tokens are `u16` with `0` meaning "none". Framing (length prefixes,
//! sequencing) belongs to the [`Channel`](crate::Channel).

use std::fmt;

use crate::decl::{
    ConstValue, DeclaredClass, DeclaredMethod, Member, MemberKind, MethodFlags, RemapEntry,
};
use crate::{Token, TokenSpace};

pub const OP_CLEAR: u8 = 0x01;
pub const OP_DECLARE_CLASS: u8 = 0x02;
pub const OP_DECLARE_METHOD: u8 = 0x03;
pub const OP_RESOLVE_ENTRY_POINT: u8 = 0x04;
pub const OP_EXECUTE: u8 = 0x05;
pub const OP_INVOKE: u8 = 0x06;

pub const REPLY_ACK: u8 = 0x00;
pub const REPLY_HANDLE: u8 = 0x01;
pub const REPLY_COMPLETED: u8 = 0x02;
pub const REPLY_NAK: u8 = 0xFF;

const CLASS_FLAG_SUPPRESS_INIT: u8 = 0x01;

const VALUE_NONE: u8 = 0;
const VALUE_BOOL: u8 = 1;
const VALUE_I32: u8 = 2;
const VALUE_I64: u8 = 3;
const VALUE_F32: u8 = 4;
const VALUE_F64: u8 = 5;
const VALUE_STR: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireError {
    pub message: String,
}

impl WireError {
    fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WireError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Clear,
    DeclareClass,
    DeclareMethod,
    ResolveEntryPoint,
    Execute,
    Invoke,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::Clear => "clear",
            RequestKind::DeclareClass => "declare-class",
            RequestKind::DeclareMethod => "declare-method",
            RequestKind::ResolveEntryPoint => "resolve-entry-point",
            RequestKind::Execute => "execute",
            RequestKind::Invoke => "invoke",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassFrame {
    pub token: Token,
    pub base_type: Option<Token>,
    pub dynamic_size: u32,
    pub static_size: u32,
    pub suppress_init: bool,
    pub static_ctor: Option<Token>,
    pub interfaces: Vec<Token>,
    pub members: Vec<Member>,
}

impl From<&DeclaredClass> for ClassFrame {
    fn from(c: &DeclaredClass) -> Self {
        ClassFrame {
            token: c.token,
            base_type: c.decl.base_type,
            dynamic_size: c.decl.dynamic_size,
            static_size: c.decl.static_size,
            suppress_init: c.decl.suppress_init,
            static_ctor: c.decl.static_ctor,
            interfaces: c.decl.interfaces.clone(),
            members: c.decl.members.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodFrame {
    pub token: Token,
    pub index: u16,
    pub flags: MethodFlags,
    pub arg_count: u8,
    pub local_count: u8,
    pub max_stack: u8,
    pub remap: Vec<RemapEntry>,
    pub code: Vec<u8>,
}

impl From<&DeclaredMethod> for MethodFrame {
    fn from(m: &DeclaredMethod) -> Self {
        MethodFrame {
            token: m.token,
            index: m.index,
            flags: m.decl.flags,
            arg_count: m.decl.arg_count,
            local_count: m.decl.local_count,
            max_stack: m.decl.max_stack,
            remap: m.decl.remap.clone(),
            code: m.decl.code.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Clear { protocol: u8 },
    DeclareClass(ClassFrame),
    DeclareMethod(MethodFrame),
    ResolveEntryPoint { token: Token },
    Execute { token: Token },
    Invoke { handle: u32 },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Clear { .. } => RequestKind::Clear,
            Request::DeclareClass(_) => RequestKind::DeclareClass,
            Request::DeclareMethod(_) => RequestKind::DeclareMethod,
            Request::ResolveEntryPoint { .. } => RequestKind::ResolveEntryPoint,
            Request::Execute { .. } => RequestKind::Execute,
            Request::Invoke { .. } => RequestKind::Invoke,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = Writer::default();
        match self {
            Request::Clear { protocol } => {
                w.u8(OP_CLEAR);
                w.u8(*protocol);
            }
            Request::DeclareClass(c) => {
                w.u8(OP_DECLARE_CLASS);
                encode_class(&mut w, c)?;
            }
            Request::DeclareMethod(m) => {
                w.u8(OP_DECLARE_METHOD);
                encode_method(&mut w, m)?;
            }
            Request::ResolveEntryPoint { token } => {
                w.u8(OP_RESOLVE_ENTRY_POINT);
                w.token(Some(*token));
            }
            Request::Execute { token } => {
                w.u8(OP_EXECUTE);
                w.token(Some(*token));
            }
            Request::Invoke { handle } => {
                w.u8(OP_INVOKE);
                w.u32(*handle);
            }
        }
        Ok(w.buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(bytes);
        let req = match r.u8("opcode")? {
            OP_CLEAR => Request::Clear {
                protocol: r.u8("protocol")?,
            },
            OP_DECLARE_CLASS => Request::DeclareClass(decode_class(&mut r)?),
            OP_DECLARE_METHOD => Request::DeclareMethod(decode_method(&mut r)?),
            OP_RESOLVE_ENTRY_POINT => Request::ResolveEntryPoint {
                token: r.required_token("entry point token")?,
            },
            OP_EXECUTE => Request::Execute {
                token: r.required_token("execute token")?,
            },
            OP_INVOKE => Request::Invoke {
                handle: r.u32("handle")?,
            },
            other => return Err(WireError::new(format!("unknown request opcode 0x{other:02x}"))),
        };
        r.finish()?;
        Ok(req)
    }
}

/// Why the device refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakStatus {
    UnknownToken,
    OutOfMemory,
    OutOfOrder,
    Malformed,
    NotReady,
    Unsupported,
    Other(u8),
}

impl NakStatus {
    pub fn code(self) -> u8 {
        match self {
            NakStatus::UnknownToken => 1,
            NakStatus::OutOfMemory => 2,
            NakStatus::OutOfOrder => 3,
            NakStatus::Malformed => 4,
            NakStatus::NotReady => 5,
            NakStatus::Unsupported => 6,
            NakStatus::Other(c) => c,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => NakStatus::UnknownToken,
            2 => NakStatus::OutOfMemory,
            3 => NakStatus::OutOfOrder,
            4 => NakStatus::Malformed,
            5 => NakStatus::NotReady,
            6 => NakStatus::Unsupported,
            c => NakStatus::Other(c),
        }
    }
}

impl fmt::Display for NakStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NakStatus::UnknownToken => f.write_str("unknown token"),
            NakStatus::OutOfMemory => f.write_str("out of memory"),
            NakStatus::OutOfOrder => f.write_str("out of order"),
            NakStatus::Malformed => f.write_str("malformed request"),
            NakStatus::NotReady => f.write_str("not ready"),
            NakStatus::Unsupported => f.write_str("unsupported"),
            NakStatus::Other(c) => write!(f, "status {c}"),
        }
    }
}

/// Token a device error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    pub space: TokenSpace,
    pub token: Token,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Handle { token: Token, handle: u32 },
    Completed { value: i32 },
    Nak { status: NakStatus, fault: Option<Fault> },
}

impl Reply {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::default();
        match self {
            Reply::Ack => w.u8(REPLY_ACK),
            Reply::Handle { token, handle } => {
                w.u8(REPLY_HANDLE);
                w.token(Some(*token));
                w.u32(*handle);
            }
            Reply::Completed { value } => {
                w.u8(REPLY_COMPLETED);
                w.u32(*value as u32);
            }
            Reply::Nak { status, fault } => {
                w.u8(REPLY_NAK);
                w.u8(status.code());
                match fault {
                    Some(f) => {
                        w.u8(f.space.wire_tag());
                        w.token(Some(f.token));
                    }
                    None => {
                        w.u8(0);
                        w.token(None);
                    }
                }
            }
        }
        w.buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(bytes);
        let reply = match r.u8("reply tag")? {
            REPLY_ACK => Reply::Ack,
            REPLY_HANDLE => Reply::Handle {
                token: r.required_token("handle token")?,
                handle: r.u32("handle")?,
            },
            REPLY_COMPLETED => Reply::Completed {
                value: r.u32("completion value")? as i32,
            },
            REPLY_NAK => {
                let status = NakStatus::from_code(r.u8("nak status")?);
                let space = r.u8("fault space")?;
                let token = r.token()?;
                let fault = match (space, token) {
                    (0, _) | (_, None) => None,
                    (tag, Some(token)) => {
                        let space = TokenSpace::from_wire_tag(tag).ok_or_else(|| {
                            WireError::new(format!("unknown fault space tag {tag}"))
                        })?;
                        Some(Fault { space, token })
                    }
                };
                Reply::Nak { status, fault }
            }
            other => return Err(WireError::new(format!("unknown reply tag 0x{other:02x}"))),
        };
        r.finish()?;
        Ok(reply)
    }
}

fn encode_class(w: &mut Writer, c: &ClassFrame) -> Result<(), WireError> {
    w.token(Some(c.token));
    w.token(c.base_type);
    w.u32(c.dynamic_size);
    w.u32(c.static_size);
    w.u8(if c.suppress_init {
        CLASS_FLAG_SUPPRESS_INIT
    } else {
        0
    });
    w.token(c.static_ctor);
    w.u16(count_u16("interfaces", c.interfaces.len())?);
    for &iface in &c.interfaces {
        w.token(Some(iface));
    }
    w.u16(count_u16("members", c.members.len())?);
    for m in &c.members {
        w.u8(member_kind_tag(m.kind));
        w.token(Some(m.token));
        let bases = u8::try_from(m.base_tokens.len()).map_err(|_| {
            WireError::new(format!(
                "member {} has {} base tokens (max 255)",
                m.token,
                m.base_tokens.len()
            ))
        })?;
        w.u8(bases);
        for &b in &m.base_tokens {
            w.token(Some(b));
        }
        encode_value(w, m.initial_value.as_ref())?;
    }
    Ok(())
}

fn decode_class(r: &mut Reader<'_>) -> Result<ClassFrame, WireError> {
    let token = r.required_token("class token")?;
    let base_type = r.token()?;
    let dynamic_size = r.u32("dynamic size")?;
    let static_size = r.u32("static size")?;
    let flags = r.u8("class flags")?;
    let static_ctor = r.token()?;
    let n_ifaces = r.u16("interface count")?;
    let mut interfaces = Vec::with_capacity(usize::from(n_ifaces));
    for _ in 0..n_ifaces {
        interfaces.push(r.required_token("interface token")?);
    }
    let n_members = r.u16("member count")?;
    let mut members = Vec::with_capacity(usize::from(n_members));
    for _ in 0..n_members {
        let kind = member_kind_from_tag(r.u8("member kind")?)?;
        let token = r.required_token("member token")?;
        let n_bases = r.u8("base token count")?;
        let mut base_tokens = Vec::with_capacity(usize::from(n_bases));
        for _ in 0..n_bases {
            base_tokens.push(r.required_token("base token")?);
        }
        let initial_value = decode_value(r)?;
        members.push(Member {
            kind,
            token,
            base_tokens,
            initial_value,
        });
    }
    Ok(ClassFrame {
        token,
        base_type,
        dynamic_size,
        static_size,
        suppress_init: flags & CLASS_FLAG_SUPPRESS_INIT != 0,
        static_ctor,
        interfaces,
        members,
    })
}

fn encode_method(w: &mut Writer, m: &MethodFrame) -> Result<(), WireError> {
    w.token(Some(m.token));
    w.u16(m.index);
    w.u8(m.flags.bits());
    w.u8(m.arg_count);
    w.u8(m.local_count);
    w.u8(m.max_stack);
    w.u16(count_u16("remap entries", m.remap.len())?);
    for e in &m.remap {
        w.u8(e.space.wire_tag());
        w.token(Some(e.token));
    }
    let code_len = u32::try_from(m.code.len())
        .map_err(|_| WireError::new(format!("method {} body too large", m.token)))?;
    w.u32(code_len);
    w.bytes(&m.code);
    Ok(())
}

fn decode_method(r: &mut Reader<'_>) -> Result<MethodFrame, WireError> {
    let token = r.required_token("method token")?;
    let index = r.u16("declaration index")?;
    let flags = MethodFlags::from_bits_truncate(r.u8("method flags")?);
    let arg_count = r.u8("argument count")?;
    let local_count = r.u8("local count")?;
    let max_stack = r.u8("max stack")?;
    let n_remap = r.u16("remap count")?;
    let mut remap = Vec::with_capacity(usize::from(n_remap));
    for _ in 0..n_remap {
        let tag = r.u8("remap space")?;
        let space = TokenSpace::from_wire_tag(tag)
            .ok_or_else(|| WireError::new(format!("unknown remap space tag {tag}")))?;
        remap.push(RemapEntry {
            space,
            token: r.required_token("remap token")?,
        });
    }
    let code_len = r.u32("code length")?;
    let code = r.take(code_len as usize, "code")?.to_vec();
    Ok(MethodFrame {
        token,
        index,
        flags,
        arg_count,
        local_count,
        max_stack,
        remap,
        code,
    })
}

fn member_kind_tag(kind: MemberKind) -> u8 {
    match kind {
        MemberKind::Field => 1,
        MemberKind::Method => 2,
        MemberKind::VirtualSlot => 3,
    }
}

fn member_kind_from_tag(tag: u8) -> Result<MemberKind, WireError> {
    match tag {
        1 => Ok(MemberKind::Field),
        2 => Ok(MemberKind::Method),
        3 => Ok(MemberKind::VirtualSlot),
        other => Err(WireError::new(format!("unknown member kind tag {other}"))),
    }
}

fn encode_value(w: &mut Writer, v: Option<&ConstValue>) -> Result<(), WireError> {
    match v {
        None => w.u8(VALUE_NONE),
        Some(ConstValue::Bool(b)) => {
            w.u8(VALUE_BOOL);
            w.u8(u8::from(*b));
        }
        Some(ConstValue::I32(x)) => {
            w.u8(VALUE_I32);
            w.bytes(&x.to_le_bytes());
        }
        Some(ConstValue::I64(x)) => {
            w.u8(VALUE_I64);
            w.bytes(&x.to_le_bytes());
        }
        Some(ConstValue::F32(x)) => {
            w.u8(VALUE_F32);
            w.bytes(&x.to_le_bytes());
        }
        Some(ConstValue::F64(x)) => {
            w.u8(VALUE_F64);
            w.bytes(&x.to_le_bytes());
        }
        Some(ConstValue::Str(s)) => {
            w.u8(VALUE_STR);
            w.u16(count_u16("string constant bytes", s.len())?);
            w.bytes(s.as_bytes());
        }
    }
    Ok(())
}

fn decode_value(r: &mut Reader<'_>) -> Result<Option<ConstValue>, WireError> {
    let v = match r.u8("value tag")? {
        VALUE_NONE => return Ok(None),
        VALUE_BOOL => ConstValue::Bool(r.u8("bool")? != 0),
        VALUE_I32 => ConstValue::I32(i32::from_le_bytes(r.array("i32")?)),
        VALUE_I64 => ConstValue::I64(i64::from_le_bytes(r.array("i64")?)),
        VALUE_F32 => ConstValue::F32(f32::from_le_bytes(r.array("f32")?)),
        VALUE_F64 => ConstValue::F64(f64::from_le_bytes(r.array("f64")?)),
        VALUE_STR => {
            let len = r.u16("string length")?;
            let bytes = r.take(usize::from(len), "string")?;
            let s = std::str::from_utf8(bytes)
                .map_err(|e| WireError::new(format!("string constant is not UTF-8: {e}")))?;
            ConstValue::Str(s.to_string())
        }
        other => return Err(WireError::new(format!("unknown value tag {other}"))),
    };
    Ok(Some(v))
}

fn count_u16(what: &str, n: usize) -> Result<u16, WireError> {
    u16::try_from(n).map_err(|_| WireError::new(format!("too many {what}: {n} (max 65535)")))
}

#[derive(Default)]
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn token(&mut self, t: Option<Token>) {
        self.u16(t.map_or(0, Token::get));
    }

    fn bytes(&mut self, b: &[u8]) {
        self.buf.extend_from_slice(b);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], WireError> {
        let end = self
            .off
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                WireError::new(format!(
                    "truncated {what}: need {n} bytes at offset {}, have {}",
                    self.off,
                    self.buf.len() - self.off
                ))
            })?;
        let out = &self.buf[self.off..end];
        self.off = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> Result<u8, WireError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.array(what)?))
    }

    fn u32(&mut self, what: &str) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.array(what)?))
    }

    fn token(&mut self) -> Result<Option<Token>, WireError> {
        Ok(Token::new(self.u16("token")?))
    }

    fn required_token(&mut self, what: &str) -> Result<Token, WireError> {
        Token::new(self.u16(what)?).ok_or_else(|| WireError::new(format!("{what} is zero")))
    }

    fn finish(&self) -> Result<(), WireError> {
        if self.off != self.buf.len() {
            return Err(WireError::new(format!(
                "{} trailing bytes after message",
                self.buf.len() - self.off
            )));
        }
        Ok(())
    }
}
