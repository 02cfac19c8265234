//! Everything an inline call needs, owned in one place.

use crate::mocks::MapClassProvider;
use kinline_core::cache::InlineCache;
use kinline_core::config::InlineConfig;
use kinline_core::diagnostics::CollectingDiagnosticHandler;
use kinline_core::inliner::{InlineCall, InlineCodegen, InlineEnv, InlineResult, SourceCompilerForInline};
use kinline_core::insn::{ClassNode, Insn, InsnId, MethodNode};
use kinline_core::reified::DefaultIntrinsics;
use kinline_core::smap::SourceMapper;
use kinline_core::transform::NoCoroutineSupport;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test subscriber once per process, filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct InlineHarness {
    pub config: InlineConfig,
    pub cache: InlineCache,
    pub classes: MapClassProvider,
    pub diagnostics: CollectingDiagnosticHandler,
}

impl InlineHarness {
    pub fn new(classes: impl IntoIterator<Item = ClassNode>) -> anyhow::Result<Self> {
        Self::with_config(InlineConfig::default(), classes)
    }

    pub fn with_config(config: InlineConfig, classes: impl IntoIterator<Item = ClassNode>) -> anyhow::Result<Self> {
        init_tracing();
        Ok(Self {
            cache: InlineCache::new(&config),
            config,
            classes: MapClassProvider::with_classes(classes)?,
            diagnostics: CollectingDiagnosticHandler::new(),
        })
    }

    pub fn env(&self) -> InlineEnv<'_> {
        InlineEnv {
            config: &self.config,
            classes: &self.classes,
            cache: &self.cache,
            intrinsics: &DefaultIntrinsics,
            coroutines: &NoCoroutineSupport,
            diagnostics: &self.diagnostics,
        }
    }

    /// Inlines the first call of `request.callee` in `caller`.
    pub fn inline(
        &self,
        compiler: &dyn SourceCompilerForInline,
        caller: &mut MethodNode,
        request: &InlineCall,
        mapper: &mut SourceMapper,
    ) -> kinline_core::Result<InlineResult> {
        let call = find_call(caller, &request.callee.owner, &request.callee.name).ok_or_else(|| {
            kinline_core::InlineError::internal(format!("{} is not called", request.callee))
        })?;
        let mut codegen = InlineCodegen::new(self.env(), compiler);
        codegen.inline_call(caller, call, request, mapper)
    }
}

pub fn find_call(method: &MethodNode, owner: &str, name: &str) -> Option<InsnId> {
    method
        .instructions
        .iter()
        .find(|(_, insn)| insn.is_method_call(owner, name))
        .map(|(id, _)| id)
}

/// Instructions of `method` without labels and line numbers.
pub fn code(method: &MethodNode) -> Vec<Insn> {
    method
        .instructions
        .iter()
        .filter(|(_, insn)| !matches!(insn, Insn::Label(_) | Insn::LineNumber { .. }))
        .map(|(_, insn)| insn.clone())
        .collect()
}
