use std::io::Error as IoError;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

#[derive(Debug, Error)]
#[error("CodecError")]
#[non_exhaustive]
pub enum CodecError {
    StdIo(#[from] IoError),
}

#[derive(Debug)]
pub(super) struct MessageCodec {
    length_codec: LengthDelimitedCodec,
}

impl MessageCodec {
    pub(super) fn new(max_length: usize) -> Self {
        Self {
            length_codec: LengthDelimitedCodec::builder()
                .max_frame_length(max_length)
                .new_codec(),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.length_codec.decode(src)? else {
            return Ok(None);
        };

        Ok(Some(frame.freeze()))
    }
}

impl Encoder<Bytes> for MessageCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.length_codec
            .encode(item, dst)
            .map_err(CodecError::StdIo)
    }
}
