use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use serde::Deserialize;

use mcuload_contracts::MCULOAD_MANIFEST_SCHEMA_VERSION;
use mcuload_core::{
    ClassDecl, ConstValue, ExecutionSet, Member, MemberKind, MethodDecl, MethodFlags,
    ReplacementRegistry, SymbolId, Token, TokenSpace,
};

/// Analyzer output: the classes and methods of one deployment, in the order
/// the analyzer discovered them.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub schema_version: String,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub replacements: Vec<ReplacementSpec>,
    #[serde(default)]
    pub classes: Vec<ClassSpec>,
    #[serde(default)]
    pub methods: Vec<MethodSpec>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplacementSpec {
    pub original: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClassSpec {
    pub symbol: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub dynamic_size: u32,
    #[serde(default)]
    pub static_size: u32,
    #[serde(default)]
    pub suppress_init: bool,
    #[serde(default)]
    pub static_ctor: Option<String>,
    #[serde(default)]
    pub members: Vec<MemberSpec>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKindSpec {
    Field,
    Method,
    VirtualSlot,
}

impl From<MemberKindSpec> for MemberKind {
    fn from(k: MemberKindSpec) -> Self {
        match k {
            MemberKindSpec::Field => MemberKind::Field,
            MemberKindSpec::Method => MemberKind::Method,
            MemberKindSpec::VirtualSlot => MemberKind::VirtualSlot,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberSpec {
    pub kind: MemberKindSpec,
    pub symbol: String,
    /// Members this one overrides or implements, nearest first.
    #[serde(default)]
    pub overrides: Vec<String>,
    #[serde(default)]
    pub initial_value: Option<ValueSpec>,
}

/// `{"i32": 7}`, `{"str": "hello"}`, ...
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSpec {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
}

impl From<&ValueSpec> for ConstValue {
    fn from(v: &ValueSpec) -> Self {
        match v {
            ValueSpec::Bool(b) => ConstValue::Bool(*b),
            ValueSpec::I32(n) => ConstValue::I32(*n),
            ValueSpec::I64(n) => ConstValue::I64(*n),
            ValueSpec::F32(n) => ConstValue::F32(*n),
            ValueSpec::F64(n) => ConstValue::F64(*n),
            ValueSpec::Str(s) => ConstValue::Str(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodSpec {
    pub symbol: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub arg_count: u8,
    #[serde(default)]
    pub local_count: u8,
    #[serde(default)]
    pub max_stack: u8,
    /// Ordered symbol references; position `i` becomes remap slot `i`.
    #[serde(default)]
    pub references: Vec<ReferenceSpec>,
    /// Base64-encoded method body.
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceSpec {
    pub space: TokenSpace,
    pub symbol: String,
}

/// An execution set built from a manifest, plus what the build skipped.
#[derive(Debug)]
pub struct BuiltSet {
    pub set: ExecutionSet,
    /// Classes and methods dropped as duplicates (after replacement).
    pub duplicates: Vec<SymbolId>,
    pub replacements: usize,
}

pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read manifest: {}", path.display()))?;
    let manifest: Manifest = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse manifest JSON: {}", path.display()))?;
    if manifest.schema_version != MCULOAD_MANIFEST_SCHEMA_VERSION {
        bail!(
            "manifest {}: schema_version {:?} is not supported (expected {:?})",
            path.display(),
            manifest.schema_version,
            MCULOAD_MANIFEST_SCHEMA_VERSION
        );
    }
    Ok(manifest)
}

impl Manifest {
    /// Feeds the manifest into a fresh execution set. Every symbol goes through
    /// the replacement registry before it is given a token.
    pub fn build(&self) -> Result<BuiltSet> {
        let mut registry = ReplacementRegistry::new();
        for r in &self.replacements {
            registry
                .insert(
                    SymbolId::from(r.original.as_str()),
                    SymbolId::from(r.replacement.as_str()),
                )
                .context("register replacement")?;
        }

        let mut b = Builder {
            registry: &registry,
            set: ExecutionSet::new(),
            duplicates: Vec::new(),
        };
        for class in &self.classes {
            b.add_class(class)
                .with_context(|| format!("class {}", class.symbol))?;
        }
        for method in &self.methods {
            b.add_method(method)
                .with_context(|| format!("method {}", method.symbol))?;
        }
        if let Some(entry) = &self.entry_point {
            let symbol = b.resolve(entry);
            b.set
                .set_entry_point(symbol)
                .with_context(|| format!("entry point {entry}"))?;
        }

        tracing::info!(
            classes = b.set.classes().len(),
            methods = b.set.methods().len(),
            duplicates = b.duplicates.len(),
            "built execution set"
        );
        Ok(BuiltSet {
            set: b.set,
            duplicates: b.duplicates,
            replacements: registry.len(),
        })
    }
}

struct Builder<'r> {
    registry: &'r ReplacementRegistry,
    set: ExecutionSet,
    duplicates: Vec<SymbolId>,
}

impl Builder<'_> {
    fn resolve(&self, raw: &str) -> SymbolId {
        self.registry.resolve(&SymbolId::from(raw)).clone()
    }

    fn token(&mut self, space: TokenSpace, raw: &str) -> Result<Token> {
        let symbol = self.resolve(raw);
        Ok(self.set.token(space, &symbol)?)
    }

    fn add_class(&mut self, spec: &ClassSpec) -> Result<()> {
        let symbol = self.resolve(&spec.symbol);
        if self.set.has_definition(&symbol) {
            tracing::debug!(class = %symbol, "duplicate class skipped");
            self.duplicates.push(symbol);
            return Ok(());
        }
        // The class's own token comes before anything it references.
        self.set.class_token(&symbol)?;

        let mut decl = ClassDecl::new(symbol, spec.dynamic_size, spec.static_size);
        if let Some(base) = &spec.base {
            decl = decl.with_base_type(self.token(TokenSpace::Type, base)?);
        }
        for iface in &spec.interfaces {
            decl = decl.with_interface(self.token(TokenSpace::Type, iface)?);
        }
        if let Some(ctor) = &spec.static_ctor {
            decl = decl.with_static_ctor(self.token(TokenSpace::Method, ctor)?);
        }
        for m in &spec.members {
            let kind = MemberKind::from(m.kind);
            let token = self.token(kind.token_space(), &m.symbol)?;
            let mut member = match kind {
                MemberKind::Field => Member::field(token),
                MemberKind::Method => Member::method(token),
                MemberKind::VirtualSlot => Member::virtual_slot(token, Vec::new()),
            };
            for base in &m.overrides {
                member
                    .base_tokens
                    .push(self.token(kind.token_space(), base)?);
            }
            if let Some(v) = &m.initial_value {
                member = member.with_initial_value(v.into());
            }
            decl = decl.with_member(member);
        }
        if spec.suppress_init {
            decl = decl.suppress_init();
        }
        self.set.add_class(decl)?;
        Ok(())
    }

    fn add_method(&mut self, spec: &MethodSpec) -> Result<()> {
        let symbol = self.resolve(&spec.symbol);
        if self.set.has_method(&symbol) {
            tracing::debug!(method = %symbol, "duplicate method skipped");
            self.duplicates.push(symbol);
            return Ok(());
        }
        self.set.method_token(&symbol)?;

        let mut flags = MethodFlags::empty();
        for name in &spec.flags {
            match MethodFlags::parse(name) {
                Some(f) => flags |= f,
                None => bail!("unknown method flag {name:?}"),
            }
        }
        let code = base64::engine::general_purpose::STANDARD
            .decode(spec.code.trim())
            .context("decode base64 code")?;

        let mut decl = MethodDecl::new(symbol, spec.arg_count)
            .with_flags(flags)
            .with_locals(spec.local_count, spec.max_stack)
            .with_code(code);
        for r in &spec.references {
            let token = self.token(r.space, &r.symbol)?;
            decl.push_reference(r.space, token);
        }
        self.set.add_method(decl)?;
        Ok(())
    }
}
