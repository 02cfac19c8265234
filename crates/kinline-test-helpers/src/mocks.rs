//! Mock implementations for testing

use anyhow::Context;
use kinline_core::inliner::{ClassProvider, FinallyBlockRequest, InlineCodegen, SourceCompilerForInline};
use kinline_core::insn::{ClassNode, Insn, MethodId};
use kinline_core::lambda::{CapturedVar, LambdaInfo};
use kinline_core::smap::SmapAndMethodNode;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Class bytes kept in memory, counting how often each is read.
#[derive(Default)]
pub struct MapClassProvider {
    classes: FxHashMap<String, Vec<u8>>,
    reads: AtomicUsize,
}

impl MapClassProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classes(classes: impl IntoIterator<Item = ClassNode>) -> anyhow::Result<Self> {
        let mut provider = Self::new();
        for class in classes {
            provider.add(&class)?;
        }
        Ok(provider)
    }

    pub fn add(&mut self, class: &ClassNode) -> anyhow::Result<()> {
        let bytes = class
            .to_bytes()
            .with_context(|| format!("encoding {}", class.name))?;
        self.classes.insert(class.name.clone(), bytes);
        Ok(())
    }

    /// Number of `class_bytes` calls so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl ClassProvider for MapClassProvider {
    fn class_bytes(&self, internal_name: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.classes.get(internal_name).cloned())
    }
}

/// Source compiler whose "sources" are prepared up front: bodies of inline
/// functions by method, bodies of lambdas by class, and the code of the
/// caller's finally sections.
#[derive(Default)]
pub struct MockSourceCompiler {
    functions: FxHashMap<MethodId, SmapAndMethodNode>,
    lambdas: FxHashMap<String, (SmapAndMethodNode, Vec<CapturedVar>)>,
    finally_code: Option<Vec<Insn>>,
    keep_finally_markers: bool,
    finally_requests: Mutex<Vec<FinallyBlockRequest>>,
}

impl MockSourceCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(mut self, id: MethodId, body: SmapAndMethodNode) -> Self {
        self.functions.insert(id, body);
        self
    }

    pub fn with_lambda(
        mut self,
        class: impl Into<String>,
        body: SmapAndMethodNode,
        captured: Vec<CapturedVar>,
    ) -> Self {
        self.lambdas.insert(class.into(), (body, captured));
        self
    }

    /// The call site is inside `try` blocks whose finally sections compile
    /// to `code`.
    pub fn with_finally(mut self, code: Vec<Insn>) -> Self {
        self.finally_code = Some(code);
        self
    }

    pub fn keeping_finally_markers(mut self) -> Self {
        self.keep_finally_markers = true;
        self
    }

    pub fn finally_requests(&self) -> Vec<FinallyBlockRequest> {
        self.finally_requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl SourceCompilerForInline for MockSourceCompiler {
    fn compile_inline_function(
        &self,
        callee: &MethodId,
        _codegen: &mut InlineCodegen<'_>,
    ) -> anyhow::Result<Option<SmapAndMethodNode>> {
        Ok(self.functions.get(callee).cloned())
    }

    fn generate_lambda_body(&self, lambda: &LambdaInfo) -> anyhow::Result<(SmapAndMethodNode, Vec<CapturedVar>)> {
        self.lambdas
            .get(&lambda.lambda_class)
            .cloned()
            .with_context(|| format!("no source for lambda {}", lambda.lambda_class))
    }

    fn has_finally_blocks(&self) -> bool {
        self.finally_code.is_some()
    }

    fn generate_finally_blocks(&self, request: &FinallyBlockRequest) -> anyhow::Result<Vec<Insn>> {
        if let Ok(mut requests) = self.finally_requests.lock() {
            requests.push(request.clone());
        }
        Ok(self.finally_code.clone().unwrap_or_default())
    }

    fn is_finally_marker_required(&self) -> bool {
        self.keep_finally_markers
    }
}
