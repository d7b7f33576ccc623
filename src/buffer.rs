/// Accumulates raw serial bytes and hands out complete lines.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    data: Vec<u8>,
    read_pos: usize,
}

impl LineBuffer {
    pub fn new() -> LineBuffer {
        LineBuffer {
            data: Vec::with_capacity(256),
            read_pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.read_pos
    }

    pub fn write(&mut self, bytes: &[u8]) {
        if self.read_pos > 0 {
            self.data.drain(..self.read_pos);
            self.read_pos = 0;
        }
        let write_pos = self.data.len();
        self.data.extend_from_slice(bytes);
        for byte in self.data[write_pos..].iter_mut() {
            if *byte > 0x7f {
                *byte = b'?'; // the peer only speaks ASCII, mask line noise
            }
        }
    }

    /// Remove and return the next complete line, without its terminator.
    /// A trailing `\r` is stripped as well.
    pub fn next_line(&mut self) -> Option<String> {
        let pending = &self.data[self.read_pos..];
        let end = pending.iter().position(|b| *b == b'\n')?;
        let mut line = &pending[..end];
        if let [rest @ .., b'\r'] = line {
            line = rest;
        }
        let line = String::from_utf8_lossy(line).into_owned();
        self.read_pos += end + 1;
        Some(line)
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
