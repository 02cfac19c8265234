pub mod cache;
pub mod config;
pub mod context;
pub mod default_lambda;
pub mod diagnostics;
pub mod errors;
pub mod inliner;
pub mod insn;
pub mod intervals;
pub mod lambda;
pub mod params;
pub mod reified;
pub mod remap;
pub mod smap;
pub mod transform;

pub use cache::InlineCache;
pub use config::{CacheCapacity, InlineConfig};
pub use context::{InlineCallSiteInfo, InliningContexts};
pub use diagnostics::{
    CollectingDiagnosticHandler, ConsoleDiagnosticHandler, Diagnostic, DiagnosticHandler,
    DiagnosticLevel,
};
pub use errors::{InlineError, Result};
pub use inliner::{
    attach_source_map, CallArgument, ClassProvider, InlineCall, InlineCodegen, InlineEnv,
    InlineResult, SourceCompilerForInline,
};
pub use insn::{AsmType, ClassNode, Insn, InsnList, MethodId, MethodNode};
pub use lambda::{CapturedVar, LambdaInfo};
pub use reified::{DefaultIntrinsics, IntrinsicsSupport, TypeParameterMappings};
pub use smap::{SmapAndMethodNode, SourceMapper};
pub use transform::{CoroutineSupport, NoCoroutineSupport};
