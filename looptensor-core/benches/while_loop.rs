use criterion::{criterion_group, criterion_main, Criterion};
use looptensor_core::{builder, Interpreter, InterpreterOptions};

const N: usize = 1_000_000;

fn accumulate_loop(options: &InterpreterOptions) -> Interpreter {
    let mut interpreter = Interpreter::with_options(options.clone());
    interpreter.add_subgraphs(2);
    builder::build_less_equal_cond_subgraph(interpreter.subgraph_mut(1).unwrap(), 8).unwrap();
    builder::build_accumulate_loop_body_subgraph(interpreter.subgraph_mut(2).unwrap()).unwrap();
    builder::build_while_subgraph(interpreter.primary_subgraph_mut()).unwrap();

    let inputs = interpreter.inputs().to_vec();
    interpreter.resize_input_tensor(inputs[0], &[1]).unwrap();
    interpreter.resize_input_tensor(inputs[1], &[N]).unwrap();
    interpreter.allocate_tensors().unwrap();
    interpreter
        .tensor_mut(inputs[0])
        .unwrap()
        .copy_from_slice(&[1i32])
        .unwrap();
    interpreter
        .tensor_mut(inputs[1])
        .unwrap()
        .copy_from_slice(&vec![1i32; N])
        .unwrap();
    interpreter
}

fn bench_while_deep_copy(c: &mut Criterion) {
    let mut interpreter = accumulate_loop(&InterpreterOptions::default());
    c.bench_function("while_accumulate_1m_deep_copy", |bencher| {
        bencher.iter(|| interpreter.invoke().unwrap());
    });
}

fn bench_while_shallow_copy(c: &mut Criterion) {
    let mut options = InterpreterOptions::new();
    options.optimize_memory_for_large_tensors(N);
    let mut interpreter = accumulate_loop(&options);
    c.bench_function("while_accumulate_1m_shallow_copy", |bencher| {
        bencher.iter(|| interpreter.invoke().unwrap());
    });
}

fn bench_while_pad_growth(c: &mut Criterion) {
    let mut interpreter = Interpreter::new();
    interpreter.add_subgraphs(2);
    builder::build_less_equal_cond_subgraph(interpreter.subgraph_mut(1).unwrap(), 64).unwrap();
    builder::build_pad_loop_body_subgraph(interpreter.subgraph_mut(2).unwrap(), [1, 2]).unwrap();
    builder::build_while_subgraph(interpreter.primary_subgraph_mut()).unwrap();
    let inputs = interpreter.inputs().to_vec();
    interpreter.resize_input_tensor(inputs[0], &[1]).unwrap();
    interpreter.resize_input_tensor(inputs[1], &[2]).unwrap();
    interpreter.allocate_tensors().unwrap();
    interpreter
        .tensor_mut(inputs[0])
        .unwrap()
        .copy_from_slice(&[1i32])
        .unwrap();
    interpreter
        .tensor_mut(inputs[1])
        .unwrap()
        .copy_from_slice(&[5i32, 7])
        .unwrap();
    c.bench_function("while_pad_growth_64", |bencher| {
        bencher.iter(|| interpreter.invoke().unwrap());
    });
}

criterion_group!(
    benches,
    bench_while_deep_copy,
    bench_while_shallow_copy,
    bench_while_pad_growth
);
criterion_main!(benches);
