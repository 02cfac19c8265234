use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kinline_core::inliner::{CallArgument, InlineCall};
use kinline_core::insn::opcodes::*;
use kinline_core::insn::Insn;
use kinline_core::smap::{SourceInfo, SourceMapper};
use kinline_test_helpers::fixtures::{
    call_site, caller, increment_lambda, lib_class, lib_method, logging_lambda, wrap_object_class, MAIN,
};
use kinline_test_helpers::{InlineHarness, MockSourceCompiler};
use std::rc::Rc;

fn mapper() -> SourceMapper {
    SourceMapper::new(Some(SourceInfo::new("Main.kt", MAIN, 10)))
}

fn bench_simple_call(c: &mut Criterion) {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let compiler = MockSourceCompiler::new();
    let callee = lib_method("twice");
    let main = caller("(I)I", vec![Insn::var(ILOAD, 0)], &callee, vec![Insn::Simple(IRETURN)]);
    let request = InlineCall::new(callee, call_site(5), vec![CallArgument::Value]);

    c.bench_function("inline_simple_call", |b| {
        b.iter(|| {
            let mut method = main.clone();
            harness
                .inline(&compiler, black_box(&mut method), &request, &mut mapper())
                .unwrap()
        })
    });
}

fn bench_lambda_call(c: &mut Criterion) {
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let (lambda, body) = increment_lambda();
    let compiler = MockSourceCompiler::new().with_lambda(lambda.lambda_class.clone(), body, Vec::new());
    let callee = lib_method("applyTo");
    let main = caller("(I)I", vec![Insn::var(ILOAD, 0)], &callee, vec![Insn::Simple(IRETURN)]);

    c.bench_function("inline_lambda_call", |b| {
        b.iter(|| {
            let (lambda, _) = increment_lambda();
            let request = InlineCall::new(
                callee.clone(),
                call_site(5),
                vec![CallArgument::Value, CallArgument::Lambda(Rc::new(lambda))],
            );
            let mut method = main.clone();
            harness
                .inline(&compiler, black_box(&mut method), &request, &mut mapper())
                .unwrap()
        })
    });
}

fn bench_regeneration(c: &mut Criterion) {
    let harness = InlineHarness::new([lib_class(), wrap_object_class()]).unwrap();
    let (lambda, body) = logging_lambda();
    let compiler = MockSourceCompiler::new().with_lambda(lambda.lambda_class.clone(), body, Vec::new());
    let callee = lib_method("wrap");
    let main = caller("()Ljava/lang/Runnable;", Vec::new(), &callee, vec![Insn::Simple(ARETURN)]);

    c.bench_function("inline_with_regeneration", |b| {
        b.iter(|| {
            let (lambda, _) = logging_lambda();
            let request = InlineCall::new(callee.clone(), call_site(5), vec![CallArgument::Lambda(Rc::new(lambda))]);
            let mut method = main.clone();
            harness
                .inline(&compiler, black_box(&mut method), &request, &mut mapper())
                .unwrap()
        })
    });
}

fn bench_sequential_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("inline_scaling");
    let harness = InlineHarness::new([lib_class()]).unwrap();
    let compiler = MockSourceCompiler::new();
    let callee = lib_method("countDown");

    for calls in [1, 8, 32].iter() {
        let mut loads = Vec::new();
        let mut tail = Vec::new();
        loads.push(Insn::var(ILOAD, 0));
        for _ in 1..*calls {
            tail.push(Insn::method(INVOKESTATIC, &callee.owner, &callee.name, &callee.desc));
        }
        tail.push(Insn::Simple(IRETURN));
        let main = caller("(I)I", loads, &callee, tail);

        group.bench_with_input(BenchmarkId::from_parameter(calls), calls, |b, &calls| {
            b.iter(|| {
                let mut method = main.clone();
                let mut mapper = mapper();
                for _ in 0..calls {
                    let request = InlineCall::new(callee.clone(), call_site(5), vec![CallArgument::Value]);
                    harness.inline(&compiler, &mut method, &request, &mut mapper).unwrap();
                }
                method
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_simple_call,
    bench_lambda_call,
    bench_regeneration,
    bench_sequential_calls
);
criterion_main!(benches);
