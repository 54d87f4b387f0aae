//! Compilation session
//!
//! A [`Backend`] owns the target, the configuration and the virtual register
//! counter shared by every function it builds. Functions are built through
//! [`Backend::begin_function`] and turned into final code by
//! [`Backend::compile`].

use crate::config::BackendConfig;
use crate::emit::{emit_function, emit_program};
use crate::frame::FrameLayout;
use crate::function::{Function, FunctionBuilder};
use crate::regalloc::{Allocation, LinearScanAllocator};
use crate::rewrite::Rewriter;
use crate::target::Target;
use log::{debug, log, log_enabled, Level};
use mcb_common::{Result, VirtRegCounter};

/// A function after allocation and rewriting
#[derive(Debug, Clone)]
pub struct CompiledFunction<O> {
    pub function: Function<O>,
    pub allocation: Allocation,
    pub frame: FrameLayout,
}

pub struct Backend<T: Target> {
    target: T,
    config: BackendConfig,
    vregs: VirtRegCounter,
}

impl<T: Target> Backend<T> {
    pub fn new(target: T) -> Self {
        Self::with_config(target, BackendConfig::default())
    }

    pub fn with_config(target: T, config: BackendConfig) -> Self {
        Self {
            target,
            config,
            vregs: VirtRegCounter::new(),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn begin_function(&mut self, name: impl Into<String>, local_frame_bytes: u32) -> FunctionBuilder<'_, T::Opcode> {
        FunctionBuilder::new(name, local_frame_bytes, &mut self.vregs)
    }

    /// Allocate registers for `func` and rewrite it into final code
    pub fn compile(&self, mut func: Function<T::Opcode>) -> Result<CompiledFunction<T::Opcode>> {
        debug!("Compiling function '{}' for {}", func.name, self.target.kind());

        let allocation = LinearScanAllocator::new(&self.target).allocate(&func.liveness);
        self.dump_allocation(&func, &allocation);

        let preserve = self.config.preserves_callee_saved(&func.name);
        let frame = Rewriter::new(&self.target).rewrite(&mut func, &allocation, preserve)?;

        Ok(CompiledFunction {
            function: func,
            allocation,
            frame,
        })
    }

    /// Allocation map and fixed physical intervals, at info level when
    /// `trace_allocation` is set
    fn dump_allocation(&self, func: &Function<T::Opcode>, allocation: &Allocation) {
        let level = if self.config.trace_allocation {
            Level::Info
        } else {
            Level::Debug
        };
        if !log_enabled!(level) {
            return;
        }
        log!(level, "Allocation for '{}' ({} spill slots):", func.name, allocation.spill_count());
        for line in allocation.describe(&self.target) {
            log!(level, "  {line}");
        }
        for (reg, ranges) in func.liveness.physical_registers() {
            let intervals: Vec<String> = ranges
                .iter()
                .map(|r| format!("[{}, {})", r.start, r.end))
                .collect();
            log!(level, "  fixed {}: {}", self.target.display_register(reg), intervals.join(" "));
        }
    }

    pub fn print(&self, compiled: &CompiledFunction<T::Opcode>) -> String {
        emit_function(&self.target, &compiled.function)
    }

    pub fn print_program(&self, compiled: &[CompiledFunction<T::Opcode>]) -> String {
        emit_program(&self.target, compiled.iter().map(|c| &c.function))
    }
}
