/*
    FluxFox
    https://github.com/dbalsom/fluxfox

    Copyright 2024-2025 Daniel Balsom

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
*/

//! The file-layer capability the core needs from its host: seek, read, write,
//! size, and sync. Implemented here for [`std::fs::File`] and, for tests, an
//! in-memory [`std::io::Cursor`].

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

pub trait FileIo {
    fn seek_from_start(&mut self, offset: u64) -> std::io::Result<()>;
    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()>;
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;
    fn sync(&mut self) -> std::io::Result<()>;
    fn size(&mut self) -> std::io::Result<u64>;
    fn set_size(&mut self, size: u64) -> std::io::Result<()>;
}

impl FileIo for File {
    fn seek_from_start(&mut self, offset: u64) -> std::io::Result<()> {
        self.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        Read::read_exact(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        Write::write_all(self, buf)
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_all()
    }

    fn size(&mut self) -> std::io::Result<u64> {
        self.metadata().map(|m| m.len())
    }

    fn set_size(&mut self, size: u64) -> std::io::Result<()> {
        self.set_len(size)
    }
}

impl FileIo for Cursor<Vec<u8>> {
    fn seek_from_start(&mut self, offset: u64) -> std::io::Result<()> {
        self.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        Read::read_exact(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let end = self.position() as usize + buf.len();
        if end > self.get_ref().len() {
            self.get_mut().resize(end, 0);
        }
        Write::write_all(self, buf)
    }

    fn sync(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn size(&mut self) -> std::io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    fn set_size(&mut self, size: u64) -> std::io::Result<()> {
        self.get_mut().resize(size as usize, 0);
        Ok(())
    }
}
