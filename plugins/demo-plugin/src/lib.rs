//! Demo plugin.
//!
//! Registers two transient `Simple` implementations and one singleton
//! `Logger` service. Compiled as a cdylib and loaded by the demo host.

use demo_api::{Logger, Simple};

#[derive(Default)]
pub struct SimpleImplA;

impl Simple for SimpleImplA {
    fn simple_string(&self) -> String {
        "Hello from SimpleImplA".to_string()
    }
}

axon::declare_component!(SimpleImplA {
    class: "axon-demo-simple-impl-a-94071767",
    interfaces: [Simple],
});

#[derive(Default)]
pub struct SimpleImplB;

impl Simple for SimpleImplB {
    fn simple_string(&self) -> String {
        "Hello from SimpleImplB".to_string()
    }
}

axon::declare_component!(SimpleImplB {
    class: "axon-demo-simple-impl-b-27c9e05d",
    interfaces: [Simple],
});

#[derive(Default)]
pub struct LoggerService;

impl Logger for LoggerService {
    // Writes straight to stdout: a dylib has its own copy of the tracing
    // dispatcher statics, so the host's subscriber would not see these.
    fn log(&self, message: &str) {
        println!("[logger] {message}");
    }
}

axon::declare_component!(LoggerService {
    class: "axon-demo-logger-service-5b8f11c2",
    interfaces: [Logger],
});

axon::declare_plugin! {
    fn register(reg: &axon::Registrar) -> Result<(), axon::RegistryError> {
        reg.component::<SimpleImplA>("Simple.A", true)?;
        reg.component::<SimpleImplB>("Simple.B", false)?;
        reg.service::<LoggerService>("Logger.Default", true)?;
        Ok(())
    }
}
