use std::collections::VecDeque;

use async_trait::async_trait;

use crate::{
    component::{Component, Ports},
    error::GenericError,
    guard::InputGuard,
    port::{InputPort, OutputPort},
};

/// Reads a single value, writes its double, and exits.
#[derive(Default)]
pub struct DoubleOnce {
    pub input: InputPort<i64>,
    pub output: OutputPort<i64>,
}

#[async_trait]
impl Component for DoubleOnce {
    fn ports(&mut self) -> Ports<'_> {
        Ports::new()
            .input("in", &mut self.input)
            .output("out", &mut self.output)
    }

    async fn process(mut self: Box<Self>) -> Result<(), GenericError> {
        if let Some(value) = self.input.recv().await {
            self.output.send(value * 2).await?;
        }
        Ok(())
    }
}

/// Doubles every value until its input closes.
#[derive(Default)]
pub struct Doubler {
    pub input: InputPort<i64>,
    pub output: OutputPort<i64>,
}

#[async_trait]
impl Component for Doubler {
    fn ports(&mut self) -> Ports<'_> {
        Ports::new()
            .input("in", &mut self.input)
            .output("out", &mut self.output)
    }

    async fn process(mut self: Box<Self>) -> Result<(), GenericError> {
        while let Some(value) = self.input.recv().await {
            self.output.send(value * 2).await?;
        }
        Ok(())
    }
}

/// Sums two operand streams pairwise, pairing by arrival index, and
/// terminates once both inputs have closed.
#[derive(Default)]
pub struct Adder {
    pub op1: InputPort<i64>,
    pub op2: InputPort<i64>,
    pub sum: OutputPort<i64>,
}

#[async_trait]
impl Component for Adder {
    fn ports(&mut self) -> Ports<'_> {
        Ports::new()
            .input("op1", &mut self.op1)
            .input("op2", &mut self.op2)
            .output("sum", &mut self.sum)
    }

    async fn process(self: Box<Self>) -> Result<(), GenericError> {
        let Adder {
            mut op1,
            mut op2,
            sum,
        } = *self;

        let mut guard = InputGuard::new(["op1", "op2"]);
        let mut op1_buf: VecDeque<i64> = VecDeque::new();
        let mut op2_buf: VecDeque<i64> = VecDeque::new();

        loop {
            tokio::select! {
                value = op1.recv(), if guard.is_open("op1") => match value {
                    Some(value) => match op2_buf.pop_front() {
                        Some(other) => sum.send(value + other).await?,
                        None => op1_buf.push_back(value),
                    },
                    None => {
                        if guard.complete("op1") {
                            break;
                        }
                    }
                },
                value = op2.recv(), if guard.is_open("op2") => match value {
                    Some(value) => match op1_buf.pop_front() {
                        Some(other) => sum.send(value + other).await?,
                        None => op2_buf.push_back(value),
                    },
                    None => {
                        if guard.complete("op2") {
                            break;
                        }
                    }
                },
            }
        }

        Ok(())
    }
}

/// Emits each word a fixed number of times; the count arrives as a single
/// value on `times`, typically as an initial packet.
#[derive(Default)]
pub struct Repeater {
    pub word: InputPort<String>,
    pub times: InputPort<i64>,
    pub words: OutputPort<String>,
}

#[async_trait]
impl Component for Repeater {
    fn ports(&mut self) -> Ports<'_> {
        Ports::new()
            .input("word", &mut self.word)
            .input("times", &mut self.times)
            .output("words", &mut self.words)
    }

    async fn process(self: Box<Self>) -> Result<(), GenericError> {
        let Repeater {
            mut word,
            mut times,
            mut words,
        } = *self;

        let times = times.recv().await.unwrap_or(0);
        while let Some(value) = word.recv().await {
            for _ in 0..times {
                words.send(value.clone()).await?;
            }
        }

        words.close();
        Ok(())
    }
}
