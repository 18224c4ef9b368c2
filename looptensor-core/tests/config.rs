use looptensor_core::{transfer::TransferPolicy, Error, Interpreter, InterpreterOptions};

#[test]
fn options_deserialize_with_defaults() {
    let empty: InterpreterOptions = serde_json::from_str("{}").unwrap();
    assert_eq!(empty, InterpreterOptions::default());

    let options: InterpreterOptions =
        serde_json::from_str(r#"{"large_tensor_threshold": 4000000}"#).unwrap();
    assert_eq!(options.large_tensor_threshold, Some(4_000_000));
    assert_eq!(options.max_while_iterations, None);
    assert_eq!(options.transfer_policy(), TransferPolicy::new(Some(4_000_000)));

    let json = serde_json::to_value(&options).unwrap();
    assert_eq!(json["large_tensor_threshold"], 4_000_000);
    assert!(json["max_while_iterations"].is_null());
}

#[test]
fn builder_style_setters() {
    let mut options = InterpreterOptions::new();
    options
        .optimize_memory_for_large_tensors(1 << 20)
        .set_max_while_iterations(64);
    assert_eq!(options.large_tensor_threshold, Some(1 << 20));
    assert_eq!(options.max_while_iterations, Some(64));

    let mut interpreter = Interpreter::new();
    interpreter.apply_options(&options).unwrap();
    assert_eq!(interpreter.options(), &options);
    assert!(interpreter.primary_subgraph().needs_allocation());
}

// Environment variables are process-wide, so every case lives in one test.
#[test]
fn options_from_env() {
    std::env::remove_var("LOOPTENSOR_LARGE_TENSOR_THRESHOLD");
    std::env::remove_var("LOOPTENSOR_MAX_WHILE_ITERATIONS");
    assert_eq!(InterpreterOptions::from_env().unwrap(), InterpreterOptions::default());

    std::env::set_var("LOOPTENSOR_LARGE_TENSOR_THRESHOLD", "1000000");
    std::env::set_var("LOOPTENSOR_MAX_WHILE_ITERATIONS", " 32 ");
    let options = InterpreterOptions::from_env().unwrap();
    assert_eq!(options.large_tensor_threshold, Some(1_000_000));
    assert_eq!(options.max_while_iterations, Some(32));

    std::env::set_var("LOOPTENSOR_MAX_WHILE_ITERATIONS", "many");
    let err = InterpreterOptions::from_env().unwrap_err();
    assert!(matches!(err, Error::WrappedContext { .. }));
    assert!(err.to_string().contains("LOOPTENSOR_MAX_WHILE_ITERATIONS"));

    std::env::remove_var("LOOPTENSOR_LARGE_TENSOR_THRESHOLD");
    std::env::remove_var("LOOPTENSOR_MAX_WHILE_ITERATIONS");
}
