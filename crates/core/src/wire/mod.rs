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

//! The wire protocol spoken between cluster tiers.
//!
//! Every logical message is one frame: a 32-bit little-endian tag, a 64-bit
//! little-endian payload length and the payload bytes. The payload encodings
//! for page statistics and site graphs live in [`codec`].

pub mod codec;

use byteorder::{ByteOrder, LittleEndian};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

const HEADER_SIZE_BYTES: usize = 12;
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024 * 1024; // 1GB

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Got an IO error")]
    Io(#[from] std::io::Error),

    #[error("Unknown message tag: {0}")]
    UnknownTag(i32),

    #[error("The payload size ({payload_size}) is larger than the maximum allowed ({max_size})")]
    PayloadTooLarge { payload_size: usize, max_size: usize },

    #[error("Unexpected end of payload")]
    Truncated,

    #[error("Payload contains a string that is not valid utf-8")]
    InvalidString(#[from] std::string::FromUtf8Error),

    #[error("All links in a page record must share one scheme and domain")]
    MixedLinkOrigin,

    #[error("Edge endpoint index {0} does not refer to a node")]
    BadNodeIndex(u64),

    #[error("Edge endpoint {0:?} is not a node")]
    UnknownEdgeEndpoint(String),
}

/// Message discriminator. The same values are used on the master↔farmer and
/// farmer↔worker channels; the channel itself disambiguates the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Tag {
    /// A url to crawl (master→farmer) or fetch (farmer→worker).
    Url = 0,
    /// The receiving node should shut down.
    Terminate = 1,
    /// Page statistics payload (worker→farmer).
    Stats = 2,
    /// Site graph payload (farmer→master).
    Summary = 3,
    /// A human-readable diagnostic (worker→farmer, farmer→master).
    Error = 4,
}

impl TryFrom<i32> for Tag {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Tag::Url),
            1 => Ok(Tag::Terminate),
            2 => Ok(Tag::Stats),
            3 => Ok(Tag::Summary),
            4 => Ok(Tag::Error),
            other => Err(Error::UnknownTag(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: Tag,
    pub payload: Vec<u8>,
}

pub async fn write_frame<W>(stream: &mut W, tag: Tag, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut header = [0; HEADER_SIZE_BYTES];
    LittleEndian::write_i32(&mut header[..4], tag as i32);
    LittleEndian::write_u64(&mut header[4..], payload.len() as u64);

    stream.write_all(&header).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;

    Ok(())
}

pub async fn read_frame<R>(stream: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0; HEADER_SIZE_BYTES];
    stream.read_exact(&mut header).await?;

    let tag = Tag::try_from(LittleEndian::read_i32(&header[..4]))?;
    let payload_size = LittleEndian::read_u64(&header[4..]) as usize;

    if payload_size > MAX_PAYLOAD_BYTES {
        return Err(Error::PayloadTooLarge {
            payload_size,
            max_size: MAX_PAYLOAD_BYTES,
        });
    }

    let mut payload = vec![0; payload_size];
    stream.read_exact(&mut payload).await?;

    Ok(Frame { tag, payload })
}
