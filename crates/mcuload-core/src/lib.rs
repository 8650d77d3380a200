//! Host-side symbol tables and staged loader for deploying programs to
//! microcontrollers without native metadata.
//!
//! An analyzer feeds classes and methods into an [`ExecutionSet`], which hands
//! out small per-space [`Token`]s and keeps a conservative memory estimate. A
//! [`Loader`] then pushes the set through a [`Channel`] in a fixed order (clear,
//! classes, methods, entry point, static constructors) and yields a
//! [`RemoteTaskHandle`] for the resident entry point.

mod channel;
pub mod decl;
pub mod estimate;
mod exec_set;
mod fingerprint;
mod loader;
mod replace;
pub mod sim;
mod symbol;
mod token;
pub mod wire;

pub use channel::{
    read_frame, write_frame, Channel, ChannelError, FramedChannel, FRAME_HEADER_LEN,
    MAX_FRAME_LEN,
};
pub use decl::{
    ClassDecl, ConstValue, DeclaredClass, DeclaredMethod, Member, MemberKind, MethodDecl,
    MethodFlags, RemapEntry,
};
pub use exec_set::{DeclarationError, ExecutionSet, ResolvedSymbol, MAX_METHODS};
pub use fingerprint::fingerprint;
pub use loader::{
    BudgetPolicy, LoadError, LoadErrorKind, LoadOptions, LoadState, Loader, Phase,
    RemoteTaskHandle,
};
pub use replace::{ReplacementError, ReplacementRegistry};
pub use sim::SimulatedDevice;
pub use symbol::SymbolId;
pub use token::{Token, TokenDirectory, TokenSpace, TokenSpaceExhausted, TokenSpaceParseError};
