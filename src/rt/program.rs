//! The program boundary.
//!
//! Kernel compilation is external to this layer: a compiled program is
//! whatever maps entry-point names to native kernel handles. For the
//! reference device that map is built from host closures over the argument
//! slot protocol, registered through [`ProgramBuilder`]. Build failures
//! surface a diagnostic log, the same shape a real compiler backend reports
//! through.

use crate::driver::DriverCode;
use crate::driver::program::{ArgView, KernelEntry, WorkItem};
use crate::error::{Error, Result};
use crate::rt::context::Context;
use crate::rt::kernel::{Kernel, KernelArgs};
use std::collections::HashMap;
use std::sync::Arc;

/// A built program: named entry points resolvable into typed kernels.
pub struct Program {
    context: Context,
    entries: HashMap<String, Arc<KernelEntry>>,
}

impl Program {
    #[must_use]
    pub fn builder(context: &Context) -> ProgramBuilder {
        ProgramBuilder {
            context: context.clone(),
            entries: Vec::new(),
        }
    }

    /// Resolves the entry point `name` into a kernel typed by `A`.
    ///
    /// # Errors
    /// Driver error if the name is unknown or `A`'s arity differs from the
    /// registered one.
    pub fn kernel<A: KernelArgs>(&self, name: &str) -> Result<Kernel<A>> {
        let entry = self
            .entries
            .get(name)
            .ok_or(Error::Driver(DriverCode::InvalidKernelName))?;
        if entry.arity != A::ARITY {
            return Err(Error::Driver(DriverCode::InvalidKernelArgs));
        }
        Ok(Kernel::from_entry(self.context.clone(), Arc::clone(entry)))
    }

    /// Names of the entry points this program exposes.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Collects entry points for one program.
pub struct ProgramBuilder {
    context: Context,
    entries: Vec<KernelEntry>,
}

impl ProgramBuilder {
    /// Registers an entry point with its argument arity. The body is
    /// invoked once per work-item at launch.
    #[must_use]
    pub fn kernel(
        mut self,
        name: &str,
        arity: usize,
        body: impl Fn(&ArgView<'_>, &WorkItem) + Send + Sync + 'static,
    ) -> Self {
        self.entries.push(KernelEntry {
            name: name.to_owned(),
            arity,
            func: Arc::new(body),
        });
        self
    }

    /// Finalizes the program.
    ///
    /// # Errors
    /// Build error (with a log naming the offender) on duplicate entry
    /// points.
    pub fn build(self) -> Result<Program> {
        let mut entries = HashMap::with_capacity(self.entries.len());
        for entry in self.entries {
            let name = entry.name.clone();
            if entries.insert(name.clone(), Arc::new(entry)).is_some() {
                log::warn!("program build failed: duplicate entry `{name}`");
                return Err(Error::Build {
                    log: format!("duplicate entry point `{name}`"),
                });
            }
        }
        Ok(Program {
            context: self.context,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::device::DeviceClass;
    use crate::rt::kernel::{Buf, Val};

    fn ctx() -> Context {
        Context::new(DeviceClass::All, 0, 1).unwrap()
    }

    fn noop_program(ctx: &Context) -> Program {
        Program::builder(ctx)
            .kernel("fill", 2, |_, _| {})
            .build()
            .unwrap()
    }

    #[test]
    fn resolves_typed_kernels() {
        let ctx = ctx();
        let program = noop_program(&ctx);
        let kernel = program.kernel::<(Buf<f32>, Val<f32>)>("fill").unwrap();
        assert_eq!(kernel.name(), "fill");
    }

    #[test]
    fn unknown_name_and_arity_mismatch() {
        let ctx = ctx();
        let program = noop_program(&ctx);
        assert!(matches!(
            program.kernel::<(Buf<f32>, Val<f32>)>("nope"),
            Err(Error::Driver(DriverCode::InvalidKernelName))
        ));
        assert!(matches!(
            program.kernel::<(Buf<f32>,)>("fill"),
            Err(Error::Driver(DriverCode::InvalidKernelArgs))
        ));
    }

    #[test]
    fn duplicate_entry_is_a_build_error() {
        let ctx = ctx();
        let result = Program::builder(&ctx)
            .kernel("k", 0, |_, _| {})
            .kernel("k", 1, |_, _| {})
            .build();
        match result {
            Err(Error::Build { log }) => assert!(log.contains("duplicate")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
