use std::collections::VecDeque;

use mcuload_core::wire::{Reply, Request, RequestKind};
use mcuload_core::{
    Channel, ChannelError, ClassDecl, ConstValue, ExecutionSet, LoadError, LoadErrorKind,
    LoadState, Loader, Member, MemberKind, MethodDecl, Phase, SimulatedDevice, SymbolId, Token,
    TokenSpace,
};

/// Decodes and records every request; acks everything except entry-point
/// resolution, which gets a fixed handle.
#[derive(Default)]
struct RecordingChannel {
    requests: Vec<Request>,
    reply: Option<Vec<u8>>,
}

impl Channel for RecordingChannel {
    fn send(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        let req = Request::decode(message).expect("loader sent a malformed request");
        let reply = match &req {
            Request::ResolveEntryPoint { token } => Reply::Handle {
                token: *token,
                handle: 7,
            },
            _ => Reply::Ack,
        };
        self.requests.push(req);
        self.reply = Some(reply.encode());
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        self.reply.take().ok_or(ChannelError::Closed)
    }
}

/// Plays back canned replies and reports a closed link once they run out.
#[derive(Default)]
struct ScriptedChannel {
    sent: Vec<RequestKind>,
    replies: VecDeque<Vec<u8>>,
}

impl Channel for ScriptedChannel {
    fn send(&mut self, message: &[u8]) -> Result<(), ChannelError> {
        let req = Request::decode(message).expect("loader sent a malformed request");
        self.sent.push(req.kind());
        Ok(())
    }

    fn receive(&mut self) -> Result<Vec<u8>, ChannelError> {
        self.replies.pop_front().ok_or(ChannelError::Closed)
    }
}

fn sym(s: &str) -> SymbolId {
    SymbolId::from(s)
}

fn tok(n: u16) -> Token {
    Token::new(n).expect("non-zero token")
}

/// Three classes (the middle one suppressed), each with a static constructor,
/// plus an entry point that references all of them.
fn layered_set() -> ExecutionSet {
    let mut set = ExecutionSet::new();
    let names = ["App.A", "App.B", "App.C"];
    for (i, name) in names.iter().enumerate() {
        let ctor = set.method_token(&sym(&format!("{name}::.cctor()"))).unwrap();
        let field = set.field_token(&sym(&format!("{name}::S"))).unwrap();
        let mut class = ClassDecl::new(*name, 8, 4)
            .with_member(Member::field(field).with_initial_value(ConstValue::I32(i as i32)))
            .with_static_ctor(ctor);
        if i == 1 {
            class = class.suppress_init();
        }
        assert!(set.add_class(class).unwrap());
    }

    let mut main = MethodDecl::new("App.Program::Main()", 0).with_code(vec![0x01, 0x02]);
    for name in names {
        let t = set.class_token(&sym(name)).unwrap();
        main.push_reference(TokenSpace::Type, t);
    }
    set.set_entry_point(sym("App.Program::Main()")).unwrap();
    // Entry point first, constructors after: declaration order is what counts.
    set.add_method(main).unwrap();
    for name in names.iter().rev() {
        set.add_method(MethodDecl::new(format!("{name}::.cctor()"), 0))
            .unwrap();
    }
    set
}

#[test]
fn load_sends_clear_classes_methods_resolve_then_static_init() {
    let set = layered_set();
    let mut loader = Loader::new(RecordingChannel::default());
    let handle = loader.load(&set).unwrap();
    assert_eq!(loader.state(), LoadState::Ready);
    assert_eq!(handle.device_handle(), 7);

    let requests = &loader.channel().requests;
    let kinds: Vec<RequestKind> = requests.iter().map(Request::kind).collect();
    use RequestKind::*;
    assert_eq!(
        kinds,
        vec![
            Clear,
            DeclareClass,
            DeclareClass,
            DeclareClass,
            DeclareMethod,
            DeclareMethod,
            DeclareMethod,
            DeclareMethod,
            ResolveEntryPoint,
            Execute,
            Execute,
        ]
    );

    let class_tokens: Vec<u16> = requests
        .iter()
        .filter_map(|r| match r {
            Request::DeclareClass(c) => Some(c.token.get()),
            _ => None,
        })
        .collect();
    assert_eq!(class_tokens, vec![1, 2, 3]);

    let method_indices: Vec<u16> = requests
        .iter()
        .filter_map(|r| match r {
            Request::DeclareMethod(m) => Some(m.index),
            _ => None,
        })
        .collect();
    assert_eq!(method_indices, vec![0, 1, 2, 3]);

    // Constructors run in class add order (A, C), skipping suppressed B,
    // regardless of the order the constructor bodies were declared in.
    let a_ctor = set.lookup_token(TokenSpace::Method, &sym("App.A::.cctor()"));
    let c_ctor = set.lookup_token(TokenSpace::Method, &sym("App.C::.cctor()"));
    let executed: Vec<Option<Token>> = requests
        .iter()
        .filter_map(|r| match r {
            Request::Execute { token } => Some(Some(*token)),
            _ => None,
        })
        .collect();
    assert_eq!(executed, vec![a_ctor, c_ctor]);
}

#[test]
fn remap_table_is_embedded_in_the_method_frame() {
    let set = layered_set();
    let mut loader = Loader::new(RecordingChannel::default());
    loader.load(&set).unwrap();
    let main = loader
        .channel()
        .requests
        .iter()
        .find_map(|r| match r {
            Request::DeclareMethod(m) if m.index == 0 => Some(m.clone()),
            _ => None,
        })
        .expect("entry point frame");
    let remapped: Vec<(TokenSpace, u16)> =
        main.remap.iter().map(|e| (e.space, e.token.get())).collect();
    assert_eq!(
        remapped,
        vec![
            (TokenSpace::Type, 1),
            (TokenSpace::Type, 2),
            (TokenSpace::Type, 3)
        ]
    );
    assert_eq!(main.code, vec![0x01, 0x02]);
}

#[test]
fn end_to_end_single_class_scenario() {
    let mut set = ExecutionSet::new();
    let entry = sym("App.Program::Main()");
    let ctor = set.method_token(&sym("App.C::.cctor()")).unwrap();
    let f = set.field_token(&sym("App.C::F")).unwrap();
    set.add_class(
        ClassDecl::new("App.C", 10, 4)
            .with_member(Member::field(f).with_initial_value(ConstValue::I32(7)))
            .with_static_ctor(ctor),
    )
    .unwrap();
    set.add_method(MethodDecl::new("App.C::.cctor()", 0)).unwrap();
    set.add_method(MethodDecl::new(entry.clone(), 0)).unwrap();
    set.set_entry_point(entry).unwrap();

    // 20 + 4 + 8 for C, 12 for each of the two zero-argument, empty methods.
    assert_eq!(set.estimate_required_memory(), 20 + 4 + 8 + 12 + 12);

    let mut loader = Loader::new(SimulatedDevice::new());
    let handle = loader.load(&set).unwrap();
    let device = loader.channel();

    let kinds: Vec<RequestKind> = device.requests().iter().map(Request::kind).collect();
    assert_eq!(
        kinds,
        vec![
            RequestKind::Clear,
            RequestKind::DeclareClass,
            RequestKind::DeclareMethod,
            RequestKind::DeclareMethod,
            RequestKind::ResolveEntryPoint,
            RequestKind::Execute,
        ]
    );

    let c = device.class(tok(1)).expect("class C on device");
    assert_eq!((c.dynamic_size, c.static_size), (10, 4));
    assert_eq!(c.members.len(), 1);
    assert_eq!(c.members[0].kind, MemberKind::Field);
    assert_eq!(c.members[0].token, tok(1));
    assert_eq!(c.members[0].initial_value, Some(ConstValue::I32(7)));

    let m = device.method(tok(1)).expect("static ctor on device");
    assert_eq!((m.index, m.arg_count), (0, 0));
    assert!(m.code.is_empty());

    assert_eq!(handle.token(), tok(2));
    assert_eq!(device.executed(), &[tok(1)]);
    assert_eq!(device.memory_used(), set.estimate_required_memory());
}

#[test]
fn single_method_entry_point_estimate_matches_reference_total() {
    // Entry point and static constructor are the same method.
    let mut set = ExecutionSet::new();
    let m = set.method_token(&sym("App.C::.cctor()")).unwrap();
    let f = set.field_token(&sym("App.C::F")).unwrap();
    set.add_class(
        ClassDecl::new("App.C", 10, 4)
            .with_member(Member::field(f).with_initial_value(ConstValue::I32(7)))
            .with_static_ctor(m),
    )
    .unwrap();
    set.add_method(MethodDecl::new("App.C::.cctor()", 0)).unwrap();
    set.set_entry_point(sym("App.C::.cctor()")).unwrap();
    assert_eq!(set.estimate_required_memory(), 44);

    let mut loader = Loader::new(SimulatedDevice::new());
    let handle = loader.load(&set).unwrap();
    assert_eq!(handle.token(), m);
    assert_eq!(loader.channel().executed(), &[m]);
}

#[test]
fn link_lost_while_declaring_methods_is_fatal() {
    let set = layered_set();
    let mut channel = ScriptedChannel::default();
    // Clear plus the three classes; nothing answers the first method.
    channel.replies.extend((0..4).map(|_| Reply::Ack.encode()));

    let mut loader = Loader::new(channel);
    let err = loader.load(&set).unwrap_err();
    assert!(
        matches!(
            err,
            LoadError::Channel {
                phase: Phase::DeclareMethods,
                source: ChannelError::Closed,
            }
        ),
        "{err}"
    );
    assert_eq!(err.kind(), LoadErrorKind::Protocol);
    assert_eq!(loader.state(), LoadState::ClassesSent);
    assert_eq!(
        loader.channel().sent.last(),
        Some(&RequestKind::DeclareMethod)
    );
    assert_eq!(loader.channel().sent.len(), 5);

    // Nothing resumes mid-sequence: the next attempt starts with Clear again.
    let mut loader = Loader::new(SimulatedDevice::new());
    loader.load(&set).unwrap();
    assert_eq!(loader.channel().requests()[0].kind(), RequestKind::Clear);
}

#[test]
fn failed_load_can_be_restarted_from_clear() {
    let set = layered_set();
    let mut loader = Loader::new(SimulatedDevice::new().with_capacity(40));
    assert!(loader.load(&set).is_err());
    assert_eq!(loader.state(), LoadState::DeviceCleared);

    let device = loader.into_channel().with_capacity(u64::MAX);
    let mut loader = Loader::new(device);
    loader.load(&set).unwrap();
    assert_eq!(loader.state(), LoadState::Ready);
    assert_eq!(loader.channel().method_count(), 4);
}

#[test]
fn run_returns_the_device_completion_value() {
    let set = layered_set();
    let mut loader = Loader::new(SimulatedDevice::new().with_completion_value(-3));
    let handle = loader.load(&set).unwrap();
    assert_eq!(loader.run(&set, &handle).unwrap(), -3);
}
