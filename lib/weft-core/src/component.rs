//! Component basics.

use std::borrow::Cow;

use async_trait::async_trait;

use crate::{
    error::GenericError,
    port::{InputBind, InputPort, OutputBind, OutputPort},
};

/// A concurrent unit of computation with named ports.
///
/// A component declares its ports through [`ports`][Self::ports] and does
/// its work in [`process`][Self::process]. The runner invokes `process`
/// exactly once; a correctly written process terminates when its relevant
/// inputs are closed, and closes (or drops, which is the same thing) every
/// output port it owns on the way out so that downstream processes observe
/// completion.
///
/// Graphs implement `Component` too, which is what makes a subgraph usable
/// as a node inside a larger graph.
#[async_trait]
pub trait Component: Send {
    /// Declares the component's ports.
    ///
    /// The names returned here are the names the graph's edge and initial
    /// packet operations match against, exactly.
    fn ports(&mut self) -> Ports<'_>;

    /// Runs the process body to completion.
    ///
    /// # Errors
    ///
    /// If an unrecoverable error occurs while running, an error is returned;
    /// it surfaces through the completion signal of the enclosing run.
    async fn process(self: Box<Self>) -> Result<(), GenericError>;
}

/// A component's port manifest: named borrows of its input and output ports.
///
/// Built by [`Component::ports`] implementations:
///
/// ```ignore
/// fn ports(&mut self) -> Ports<'_> {
///     Ports::new()
///         .input("in", &mut self.input)
///         .output("out", &mut self.output)
/// }
/// ```
#[derive(Default)]
pub struct Ports<'a> {
    inputs: Vec<(Cow<'static, str>, &'a mut dyn InputBind)>,
    outputs: Vec<(Cow<'static, str>, &'a mut dyn OutputBind)>,
}

impl<'a> Ports<'a> {
    /// Creates an empty manifest.
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Adds an input port under the given name.
    pub fn input<S, T>(mut self, name: S, port: &'a mut InputPort<T>) -> Self
    where
        S: Into<Cow<'static, str>>,
        T: Send + 'static,
    {
        self.inputs.push((name.into(), port));
        self
    }

    /// Adds an output port under the given name.
    pub fn output<S, T>(mut self, name: S, port: &'a mut OutputPort<T>) -> Self
    where
        S: Into<Cow<'static, str>>,
        T: Send + 'static,
    {
        self.outputs.push((name.into(), port));
        self
    }

    /// Returns whether an input port with the given name is declared.
    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|(n, _)| n.as_ref() == name)
    }

    /// Returns whether an output port with the given name is declared.
    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|(n, _)| n.as_ref() == name)
    }

    /// Looks up an input port by name.
    pub fn input_mut(&mut self, name: &str) -> Option<&mut dyn InputBind> {
        for (n, port) in self.inputs.iter_mut() {
            if n.as_ref() == name {
                return Some(&mut **port);
            }
        }
        None
    }

    /// Looks up an output port by name.
    pub fn output_mut(&mut self, name: &str) -> Option<&mut dyn OutputBind> {
        for (n, port) in self.outputs.iter_mut() {
            if n.as_ref() == name {
                return Some(&mut **port);
            }
        }
        None
    }

    pub(crate) fn push_input(&mut self, name: Cow<'static, str>, port: &'a mut dyn InputBind) {
        self.inputs.push((name, port));
    }

    pub(crate) fn push_output(&mut self, name: Cow<'static, str>, port: &'a mut dyn OutputBind) {
        self.outputs.push((name, port));
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Vec<(Cow<'static, str>, &'a mut dyn InputBind)>,
        Vec<(Cow<'static, str>, &'a mut dyn OutputBind)>,
    ) {
        (self.inputs, self.outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_lookup() {
        let mut input: InputPort<i64> = InputPort::unbound();
        let mut output: OutputPort<i64> = OutputPort::unbound();

        let mut ports = Ports::new().input("in", &mut input).output("out", &mut output);

        assert!(ports.has_input("in"));
        assert!(!ports.has_input("out"));
        assert!(ports.has_output("out"));
        assert!(ports.input_mut("in").is_some());
        assert!(ports.input_mut("out").is_none());
        assert!(ports.output_mut("out").is_some());
    }
}
