//! Shared test doubles

#![allow(dead_code)]

use motorkit_communication::LineTransport;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};

/// Recorded behaviour of a [`ScriptedTransport`]
#[derive(Debug, Default)]
pub struct Script {
    /// Canned replies keyed by command text
    pub replies: HashMap<String, Vec<String>>,
    /// Lines waiting to be read
    pub pending: VecDeque<String>,
    /// Commands written, in order
    pub writes: Vec<String>,
    /// Writes that started while an earlier command's window was still open
    pub overlaps: usize,
    /// Fail writes with a broken pipe
    pub fail_writes: bool,
    /// Fail reads
    pub fail_reads: bool,
    /// Closed
    pub closed: bool,
    in_window: bool,
}

/// A transport that answers from a script
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    pub script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, command: &str, lines: &[&str]) -> Self {
        self.script.lock().unwrap().replies.insert(
            command.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    pub fn inject(&self, line: &str) {
        self.script.lock().unwrap().pending.push_back(line.to_string());
    }

    pub fn writes(&self) -> Vec<String> {
        self.script.lock().unwrap().writes.clone()
    }

    pub fn overlaps(&self) -> usize {
        self.script.lock().unwrap().overlaps
    }

    pub fn is_closed(&self) -> bool {
        self.script.lock().unwrap().closed
    }

    pub fn fail_writes(&self) {
        self.script.lock().unwrap().fail_writes = true;
    }

    pub fn fail_reads(&self) {
        self.script.lock().unwrap().fail_reads = true;
    }

    pub fn boxed(&self) -> Box<dyn LineTransport> {
        Box::new(self.clone())
    }
}

impl LineTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "SCRIPTED"
    }

    fn write_line(&mut self, text: &str) -> io::Result<()> {
        let mut script = self.script.lock().unwrap();
        if script.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone"));
        }
        if script.in_window {
            script.overlaps += 1;
        }
        script.in_window = true;
        script.writes.push(text.to_string());
        if let Some(reply) = script.replies.get(text).cloned() {
            script.pending.extend(reply);
        }
        Ok(())
    }

    fn read_available(&mut self) -> io::Result<Vec<String>> {
        let mut script = self.script.lock().unwrap();
        if script.fail_reads {
            return Err(io::Error::new(io::ErrorKind::Other, "device unplugged"));
        }
        script.in_window = false;
        Ok(script.pending.drain(..).collect())
    }

    fn close(&mut self) -> io::Result<()> {
        self.script.lock().unwrap().closed = true;
        Ok(())
    }
}
