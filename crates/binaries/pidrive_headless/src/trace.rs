/*
    PiDrive

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    trace.rs

    Bus trace parsing and replay.

    One operation per line: 'R <addr> [expect]', 'W <addr> <value>', 'C <cycles>',
    'P <key>' and 'U <key>' for key press and release. '#' starts a comment.
*/

use anyhow::{anyhow, bail, Context, Error};

use pidrive_core::{bus::MemoryBus, drive::DriveCpu, input::KeyRepeater};

/// Bus cycles charged for a traced read or write.
pub const ACCESS_CYCLES: u32 = 4;
/// Longest stretch of idle cycles returned from one step, so the caller's clock keeps pace.
pub const IDLE_SLICE: u32 = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceOp {
    Read { address: u16, expect: Option<u8> },
    Write { address: u16, value: u8 },
    Cycles(u32),
    KeyDown(u8),
    KeyUp(u8),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceEntry {
    pub line: usize,
    pub op:   TraceOp,
}

fn parse_hex(token: Option<&str>, what: &str) -> Result<u16, Error> {
    let token = token.ok_or_else(|| anyhow!("missing {}", what))?;
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix('$'))
        .unwrap_or(token);
    u16::from_str_radix(digits, 16).map_err(|_| anyhow!("bad {} '{}'", what, token))
}

fn parse_byte(token: Option<&str>, what: &str) -> Result<u8, Error> {
    let value = parse_hex(token, what)?;
    u8::try_from(value).map_err(|_| anyhow!("bad {} '{:X}'", what, value))
}

fn parse_line(text: &str) -> Result<Option<TraceOp>, Error> {
    let text = text.split('#').next().unwrap_or("").trim();
    let mut tokens = text.split_whitespace();
    let Some(mnemonic) = tokens.next()
    else {
        return Ok(None);
    };

    let op = match mnemonic.to_ascii_uppercase().as_str() {
        "R" => TraceOp::Read {
            address: parse_hex(tokens.next(), "address")?,
            expect:  match tokens.next() {
                Some(token) => Some(parse_byte(Some(token), "expected value")?),
                None => None,
            },
        },
        "W" => TraceOp::Write {
            address: parse_hex(tokens.next(), "address")?,
            value:   parse_byte(tokens.next(), "value")?,
        },
        "C" => {
            let token = tokens.next().ok_or_else(|| anyhow!("missing cycle count"))?;
            TraceOp::Cycles(token.parse().map_err(|_| anyhow!("bad cycle count '{}'", token))?)
        }
        "P" => TraceOp::KeyDown(tokens.next().ok_or_else(|| anyhow!("missing key"))?.parse()?),
        "U" => TraceOp::KeyUp(tokens.next().ok_or_else(|| anyhow!("missing key"))?.parse()?),
        other => bail!("unknown operation '{}'", other),
    };

    if let Some(extra) = tokens.next() {
        bail!("unexpected '{}'", extra);
    }
    Ok(Some(op))
}

/// Parse a bus trace. Addresses and data are hexadecimal, cycle counts and keys decimal.
pub fn parse_trace(text: &str) -> Result<Vec<TraceEntry>, Error> {
    let mut entries = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if let Some(op) = parse_line(line).with_context(|| format!("Trace line {}", line_no))? {
            entries.push(TraceEntry { line: line_no, op });
        }
    }
    Ok(entries)
}

/// A stand-in CPU that replays a bus trace instead of executing 6502 code.
pub struct TraceCpu {
    entries: Vec<TraceEntry>,
    pc: usize,
    wait: u32,
    irq: bool,
    irq_edges: u64,
    mismatches: usize,
    keys: Option<KeyRepeater>,
}

impl TraceCpu {
    pub fn new(entries: Vec<TraceEntry>, keys: Option<KeyRepeater>) -> Self {
        Self {
            entries,
            pc: 0,
            wait: 0,
            irq: false,
            irq_edges: 0,
            mismatches: 0,
            keys,
        }
    }

    pub fn finished(&self) -> bool {
        self.pc >= self.entries.len() && self.wait == 0
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn executed(&self) -> usize {
        self.pc
    }

    pub fn mismatches(&self) -> usize {
        self.mismatches
    }

    pub fn irq_edges(&self) -> u64 {
        self.irq_edges
    }

    fn key(&self, key: u8, down: bool) {
        match &self.keys {
            Some(keys) if down => keys.key_down(key),
            Some(keys) => keys.key_up(key),
            None => log::warn!("TRACE: Key {} ignored, no key input attached", key),
        }
    }
}

impl DriveCpu for TraceCpu {
    fn reset(&mut self, _bus: &mut dyn MemoryBus) {
        self.pc = 0;
        self.wait = 0;
        self.irq = false;
    }

    fn step(&mut self, bus: &mut dyn MemoryBus) -> u32 {
        if self.wait > 0 {
            let slice = self.wait.min(IDLE_SLICE);
            self.wait -= slice;
            return slice;
        }

        let Some(entry) = self.entries.get(self.pc).cloned()
        else {
            return IDLE_SLICE;
        };
        self.pc += 1;

        match entry.op {
            TraceOp::Read { address, expect } => {
                let value = bus.read(address);
                log::trace!("TRACE: R {:04X} -> {:02X}", address, value);
                if let Some(expect) = expect {
                    if value != expect {
                        log::warn!(
                            "TRACE: Line {}: read {:04X} returned {:02X}, expected {:02X}",
                            entry.line,
                            address,
                            value,
                            expect
                        );
                        self.mismatches += 1;
                    }
                }
                ACCESS_CYCLES
            }
            TraceOp::Write { address, value } => {
                log::trace!("TRACE: W {:04X} <- {:02X}", address, value);
                bus.write(address, value);
                ACCESS_CYCLES
            }
            TraceOp::Cycles(cycles) => {
                let slice = cycles.min(IDLE_SLICE);
                self.wait = cycles - slice;
                slice
            }
            TraceOp::KeyDown(key) => {
                self.key(key, true);
                1
            }
            TraceOp::KeyUp(key) => {
                self.key(key, false);
                1
            }
        }
    }

    fn set_irq(&mut self, asserted: bool) {
        if asserted && !self.irq {
            self.irq_edges += 1;
        }
        self.irq = asserted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trace() {
        let entries = parse_trace("# boot\nW 4002 44\nR $3000 30 # open bus\n\nC 100\nR 0x8000\nP 3\nU 3\n").unwrap();
        let ops: Vec<TraceOp> = entries.iter().map(|e| e.op).collect();
        assert_eq!(
            ops,
            vec![
                TraceOp::Write {
                    address: 0x4002,
                    value:   0x44,
                },
                TraceOp::Read {
                    address: 0x3000,
                    expect:  Some(0x30),
                },
                TraceOp::Cycles(100),
                TraceOp::Read {
                    address: 0x8000,
                    expect:  None,
                },
                TraceOp::KeyDown(3),
                TraceOp::KeyUp(3),
            ]
        );
        assert_eq!(entries[2].line, 5);
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let err = parse_trace("W 4000 00\nW 4000\n").unwrap_err();
        assert!(format!("{:#}", err).contains("Trace line 2"));

        let err = parse_trace("X 1\n").unwrap_err();
        assert!(format!("{:#}", err).contains("unknown operation"));

        let err = parse_trace("R 10000\n").unwrap_err();
        assert!(format!("{:#}", err).contains("bad address"));

        assert!(parse_trace("C 10 20\n").is_err());
    }
}
