use std::fmt;

use mcuload_contracts::WIRE_PROTOCOL_VERSION;

use crate::channel::{Channel, ChannelError};
use crate::wire::{ClassFrame, Fault, MethodFrame, NakStatus, Reply, Request, RequestKind, WireError};
use crate::{ExecutionSet, SymbolId, Token, TokenSpace};

/// How far the device has been brought by the current (or last) load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadState {
    Idle,
    DeviceCleared,
    ClassesSent,
    MethodsSent,
    EntryPointResolved,
    Ready,
}

impl LoadState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadState::Idle => "idle",
            LoadState::DeviceCleared => "device-cleared",
            LoadState::ClassesSent => "classes-sent",
            LoadState::MethodsSent => "methods-sent",
            LoadState::EntryPointResolved => "entry-point-resolved",
            LoadState::Ready => "ready",
        }
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step of the load sequence an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Clear,
    DeclareClasses,
    DeclareMethods,
    ResolveEntryPoint,
    StaticInit,
    Run,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Clear => "clear",
            Phase::DeclareClasses => "declare-classes",
            Phase::DeclareMethods => "declare-methods",
            Phase::ResolveEntryPoint => "resolve-entry-point",
            Phase::StaticInit => "static-init",
            Phase::Run => "run",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BudgetPolicy {
    #[default]
    Warn,
    Abort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Bytes the device can spend on declarations; `None` skips the check.
    pub memory_budget: Option<u64>,
    pub over_budget: BudgetPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    Configuration,
    Capacity,
    Protocol,
}

impl LoadErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadErrorKind::Configuration => "configuration",
            LoadErrorKind::Capacity => "capacity",
            LoadErrorKind::Protocol => "protocol",
        }
    }
}

#[derive(Debug)]
pub enum LoadError {
    NoEntryPoint,
    EntryPointNotDeclared {
        symbol: SymbolId,
    },
    StaticCtorNotDeclared {
        class: SymbolId,
        token: Token,
    },
    UnresolvedReference {
        method: SymbolId,
        space: TokenSpace,
        token: Token,
    },
    UnresolvedClassReference {
        class: SymbolId,
        space: TokenSpace,
        token: Token,
    },
    InsufficientMemory {
        estimated: u64,
        budget: u64,
    },
    Encode {
        phase: Phase,
        source: WireError,
    },
    Channel {
        phase: Phase,
        source: ChannelError,
    },
    MalformedReply {
        phase: Phase,
        source: WireError,
    },
    UnexpectedReply {
        phase: Phase,
        reply: Reply,
    },
    Rejected {
        phase: Phase,
        request: RequestKind,
        status: NakStatus,
        fault: Option<Fault>,
        symbol: Option<SymbolId>,
    },
    EntryPointMismatch {
        expected: Token,
        actual: Token,
    },
    NotReady {
        state: LoadState,
    },
    StaleHandle,
}

impl LoadError {
    pub fn kind(&self) -> LoadErrorKind {
        match self {
            LoadError::NoEntryPoint
            | LoadError::EntryPointNotDeclared { .. }
            | LoadError::StaticCtorNotDeclared { .. }
            | LoadError::UnresolvedReference { .. }
            | LoadError::UnresolvedClassReference { .. }
            | LoadError::NotReady { .. }
            | LoadError::StaleHandle => LoadErrorKind::Configuration,
            LoadError::InsufficientMemory { .. } => LoadErrorKind::Capacity,
            LoadError::Encode { .. }
            | LoadError::Channel { .. }
            | LoadError::MalformedReply { .. }
            | LoadError::UnexpectedReply { .. }
            | LoadError::Rejected { .. }
            | LoadError::EntryPointMismatch { .. } => LoadErrorKind::Protocol,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::NoEntryPoint => f.write_str("no entry point designated"),
            LoadError::EntryPointNotDeclared { symbol } => {
                write!(f, "entry point {symbol} has no method declaration")
            }
            LoadError::StaticCtorNotDeclared { class, token } => write!(
                f,
                "static constructor (method {token}) of class {class} has no method declaration"
            ),
            LoadError::UnresolvedReference {
                method,
                space,
                token,
            } => write!(
                f,
                "method {method} references {space} token {token}, which was never allocated"
            ),
            LoadError::UnresolvedClassReference {
                class,
                space,
                token,
            } => write!(
                f,
                "class {class} references {space} token {token}, which was never allocated"
            ),
            LoadError::InsufficientMemory { estimated, budget } => write!(
                f,
                "estimated {estimated} bytes exceeds the device budget of {budget} bytes"
            ),
            LoadError::Encode { phase, source } => write!(f, "{phase}: encode request: {source}"),
            LoadError::Channel { phase, source } => write!(f, "{phase}: {source}"),
            LoadError::MalformedReply { phase, source } => {
                write!(f, "{phase}: malformed reply: {source}")
            }
            LoadError::UnexpectedReply { phase, reply } => {
                write!(f, "{phase}: unexpected reply {reply:?}")
            }
            LoadError::Rejected {
                phase,
                request,
                status,
                fault,
                symbol,
            } => {
                write!(f, "{phase}: device rejected {request}: {status}")?;
                if let Some(fault) = fault {
                    write!(f, " ({} token {}", fault.space, fault.token)?;
                    if let Some(symbol) = symbol {
                        write!(f, " = {symbol}")?;
                    }
                    f.write_str(")")?;
                }
                Ok(())
            }
            LoadError::EntryPointMismatch { expected, actual } => write!(
                f,
                "device resolved entry point to method {actual}, expected {expected}"
            ),
            LoadError::NotReady { state } => {
                write!(f, "device is not ready to run (load state: {state})")
            }
            LoadError::StaleHandle => f.write_str("task handle belongs to an earlier load"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Encode { source, .. } | LoadError::MalformedReply { source, .. } => {
                Some(source)
            }
            LoadError::Channel { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Reference to the entry point resident on the device.
///
/// Only [`Loader::load`] creates one, and it is only valid with the loader (and
/// load) that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTaskHandle {
    token: Token,
    device_handle: u32,
    generation: u64,
}

impl RemoteTaskHandle {
    pub fn token(&self) -> Token {
        self.token
    }

    pub fn device_handle(&self) -> u32 {
        self.device_handle
    }
}

/// Drives the load sequence over a channel it owns exclusively.
pub struct Loader<C> {
    channel: C,
    options: LoadOptions,
    state: LoadState,
    generation: u64,
}

impl<C: Channel> Loader<C> {
    pub fn new(channel: C) -> Self {
        Self::with_options(channel, LoadOptions::default())
    }

    pub fn with_options(channel: C, options: LoadOptions) -> Self {
        Self {
            channel,
            options,
            state: LoadState::Idle,
            generation: 0,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn options(&self) -> LoadOptions {
        self.options
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Clears the device and pushes `set` to it, ending with static
    /// initialization.
    ///
    /// Every call starts over from a blank device. Configuration and budget
    /// problems are reported before anything is sent. On a protocol failure the
    /// device is left partially loaded and [`Loader::state`] tells how far the
    /// sequence got.
    pub fn load(&mut self, set: &ExecutionSet) -> Result<RemoteTaskHandle, LoadError> {
        let entry = preflight(set)?;
        self.check_budget(set)?;

        self.generation += 1;
        self.state = LoadState::Idle;
        let _span = tracing::info_span!("load", generation = self.generation).entered();

        self.exchange_ack(
            set,
            Phase::Clear,
            &Request::Clear {
                protocol: WIRE_PROTOCOL_VERSION,
            },
        )?;
        self.advance(LoadState::DeviceCleared);

        for class in set.classes() {
            tracing::debug!(class = %class.decl.symbol, token = %class.token, "sending class");
            self.exchange_ack(
                set,
                Phase::DeclareClasses,
                &Request::DeclareClass(ClassFrame::from(class)),
            )?;
        }
        self.advance(LoadState::ClassesSent);

        for method in set.methods() {
            tracing::debug!(
                method = %method.decl.symbol,
                token = %method.token,
                index = method.index,
                "sending method"
            );
            self.exchange_ack(
                set,
                Phase::DeclareMethods,
                &Request::DeclareMethod(MethodFrame::from(method)),
            )?;
        }
        self.advance(LoadState::MethodsSent);

        let reply = self.exchange(
            set,
            Phase::ResolveEntryPoint,
            &Request::ResolveEntryPoint { token: entry },
        )?;
        let device_handle = match reply {
            Reply::Handle { token, handle } if token == entry => handle,
            Reply::Handle { token, .. } => {
                return Err(LoadError::EntryPointMismatch {
                    expected: entry,
                    actual: token,
                })
            }
            reply => {
                return Err(LoadError::UnexpectedReply {
                    phase: Phase::ResolveEntryPoint,
                    reply,
                })
            }
        };
        self.advance(LoadState::EntryPointResolved);

        // Declaration order only; classes whose statics depend on each other
        // must be declared in dependency order.
        for class in set.classes().iter().filter(|c| c.decl.needs_static_init()) {
            if let Some(ctor) = class.decl.static_ctor {
                tracing::debug!(class = %class.decl.symbol, %ctor, "running static constructor");
                self.exchange_ack(set, Phase::StaticInit, &Request::Execute { token: ctor })?;
            }
        }
        self.advance(LoadState::Ready);

        Ok(RemoteTaskHandle {
            token: entry,
            device_handle,
            generation: self.generation,
        })
    }

    /// Starts the entry point and waits for its completion value.
    pub fn run(&mut self, set: &ExecutionSet, handle: &RemoteTaskHandle) -> Result<i32, LoadError> {
        if handle.generation != self.generation {
            return Err(LoadError::StaleHandle);
        }
        if self.state != LoadState::Ready {
            return Err(LoadError::NotReady { state: self.state });
        }
        let reply = self.exchange(
            set,
            Phase::Run,
            &Request::Invoke {
                handle: handle.device_handle,
            },
        )?;
        match reply {
            Reply::Completed { value } => {
                tracing::info!(value, "entry point completed");
                Ok(value)
            }
            reply => Err(LoadError::UnexpectedReply {
                phase: Phase::Run,
                reply,
            }),
        }
    }

    fn advance(&mut self, next: LoadState) {
        tracing::info!(from = %self.state, to = %next, "load state");
        self.state = next;
    }

    fn check_budget(&self, set: &ExecutionSet) -> Result<(), LoadError> {
        let Some(budget) = self.options.memory_budget else {
            return Ok(());
        };
        let estimated = set.estimate_required_memory();
        if estimated <= budget {
            return Ok(());
        }
        match self.options.over_budget {
            BudgetPolicy::Warn => {
                tracing::warn!(estimated, budget, "estimated footprint exceeds device budget");
                Ok(())
            }
            BudgetPolicy::Abort => Err(LoadError::InsufficientMemory { estimated, budget }),
        }
    }

    fn exchange_ack(
        &mut self,
        set: &ExecutionSet,
        phase: Phase,
        request: &Request,
    ) -> Result<(), LoadError> {
        match self.exchange(set, phase, request)? {
            Reply::Ack => Ok(()),
            reply => Err(LoadError::UnexpectedReply { phase, reply }),
        }
    }

    fn exchange(
        &mut self,
        set: &ExecutionSet,
        phase: Phase,
        request: &Request,
    ) -> Result<Reply, LoadError> {
        let bytes = request
            .encode()
            .map_err(|source| LoadError::Encode { phase, source })?;
        self.channel
            .send(&bytes)
            .map_err(|source| LoadError::Channel { phase, source })?;
        let raw = self
            .channel
            .receive()
            .map_err(|source| LoadError::Channel { phase, source })?;
        let reply =
            Reply::decode(&raw).map_err(|source| LoadError::MalformedReply { phase, source })?;
        if let Reply::Nak { status, fault } = reply {
            let symbol = fault.and_then(|f| set.inverse_resolve(f.space, f.token).cloned());
            return Err(LoadError::Rejected {
                phase,
                request: request.kind(),
                status,
                fault,
                symbol,
            });
        }
        Ok(reply)
    }
}

/// Checks everything that can be known before touching the device and returns
/// the entry-point token.
fn preflight(set: &ExecutionSet) -> Result<Token, LoadError> {
    let symbol = set.entry_point().ok_or(LoadError::NoEntryPoint)?;
    let entry = match set.method(symbol) {
        Some(m) => m.token,
        None => {
            return Err(LoadError::EntryPointNotDeclared {
                symbol: symbol.clone(),
            })
        }
    };

    for class in set.classes() {
        let decl = &class.decl;
        let types = decl
            .base_type
            .iter()
            .chain(&decl.interfaces)
            .map(|&t| (TokenSpace::Type, t));
        let members = decl.members.iter().flat_map(|m| {
            let space = m.kind.token_space();
            std::iter::once(m.token)
                .chain(m.base_tokens.iter().copied())
                .map(move |t| (space, t))
        });
        for (space, token) in types.chain(members) {
            if set.inverse_resolve(space, token).is_none() {
                return Err(LoadError::UnresolvedClassReference {
                    class: decl.symbol.clone(),
                    space,
                    token,
                });
            }
        }

        if let Some(ctor) = class.decl.static_ctor {
            if set.method_by_token(ctor).is_none() {
                return Err(LoadError::StaticCtorNotDeclared {
                    class: class.decl.symbol.clone(),
                    token: ctor,
                });
            }
        }
    }

    for method in set.methods() {
        for r in &method.decl.remap {
            if set.inverse_resolve(r.space, r.token).is_none() {
                return Err(LoadError::UnresolvedReference {
                    method: method.decl.symbol.clone(),
                    space: r.space,
                    token: r.token,
                });
            }
        }
    }

    Ok(entry)
}
