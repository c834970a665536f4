// Webmap is an open source distributed web crawler.
// Copyright (C) 2024 Webmap
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! A frame channel over any duplex byte stream.
//!
//! Production channels wrap [`tokio::net::TcpStream`]; tests wrap an
//! in-memory duplex pipe. [`Channel::split`] separates the two directions so
//! one task can keep receiving while another sends.

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::wire::{self, Frame, Result, Tag};

pub struct Channel<S> {
    stream: S,
}

impl<S> Channel<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, tag: Tag, payload: &[u8]) -> Result<()> {
        wire::write_frame(&mut self.stream, tag, payload).await
    }

    pub async fn recv(&mut self) -> Result<Frame> {
        wire::read_frame(&mut self.stream).await
    }

    pub fn split(self) -> (FrameSender<S>, FrameReceiver<S>) {
        let (read, write) = tokio::io::split(self.stream);
        (FrameSender { stream: write }, FrameReceiver { stream: read })
    }
}

pub struct FrameSender<S> {
    stream: WriteHalf<S>,
}

impl<S: AsyncRead + AsyncWrite> FrameSender<S> {
    pub async fn send(&mut self, tag: Tag, payload: &[u8]) -> Result<()> {
        wire::write_frame(&mut self.stream, tag, payload).await
    }
}

pub struct FrameReceiver<S> {
    stream: ReadHalf<S>,
}

impl<S: AsyncRead + AsyncWrite> FrameReceiver<S> {
    pub async fn recv(&mut self) -> Result<Frame> {
        wire::read_frame(&mut self.stream).await
    }
}
