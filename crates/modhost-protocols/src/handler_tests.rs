use super::*;

#[tokio::test]
async fn test_command_fn_adapter() {
    let handler = command_fn(|cmd: CommandEnvelope, _trace| async move {
        let who: String = cmd.param_as("name").unwrap_or_default();
        Ok(ResultEnvelope::success(format!("hello {}", who)))
    });

    let cmd = CommandEnvelope::new("Greet").with_param("name", "ada");
    let result = handler.handle(&cmd, &TraceContext::new()).await.unwrap();
    assert!(result.success);
    assert_eq!(result.message, "hello ada");
}

#[tokio::test]
async fn test_event_fn_adapter_propagates_error() {
    let handler = event_fn(|_event| async move { Err(HandlerError::Custom("nope".into())) });
    let event = EventEnvelope::new("t", "test");
    assert!(handler.handle(&event).await.is_err());
}

#[tokio::test]
async fn test_job_fn_sees_cancellation() {
    let token = CancellationToken::new();
    let handler = job_fn(|ctx: JobContext| async move {
        if ctx.is_cancelled() {
            Err(HandlerError::Cancelled)
        } else {
            Ok(())
        }
    });

    let ctx = JobContext::new("Nightly", token.clone());
    assert!(handler.execute(&ctx).await.is_ok());

    token.cancel();
    assert!(matches!(
        handler.execute(&ctx).await,
        Err(HandlerError::Cancelled)
    ));
}

#[tokio::test]
async fn test_validator_fn_adapter() {
    let validator = validator_fn(|cmd: CommandEnvelope, _trace| async move {
        if cmd.param("qty").is_some() {
            Ok(())
        } else {
            Err(HandlerError::Validation("qty is required".into()))
        }
    });

    let trace = TraceContext::new();
    assert!(validator.validate(&CommandEnvelope::new("x").with_param("qty", 1), &trace).await.is_ok());
    assert!(validator.validate(&CommandEnvelope::new("x"), &trace).await.is_err());
}

#[test]
fn test_handler_ref_kind_and_accessors() {
    let handler = HandlerRef::Command(command_fn(|_, _| async { Ok(ResultEnvelope::success("")) }));
    assert_eq!(handler.kind(), ContractKind::Command);
    assert!(handler.as_command().is_some());
    assert!(handler.as_event().is_none());
    assert_eq!(format!("{:?}", handler), "HandlerRef::command");

    let job = HandlerRef::Job(job_fn(|_| async { Ok(()) }));
    assert_eq!(job.kind(), ContractKind::Job);
    assert!(job.as_job().is_some());
    assert!(job.as_validator().is_none());
}
