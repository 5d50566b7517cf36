use crate::check_window_config;
use crate::ConfigError;
#[cfg(feature = "alloc")]
use crate::Error;
use crate::OutputInfo;

#[cfg(feature = "alloc")]
use alloc::boxed::Box;
#[cfg(feature = "alloc")]
use alloc::vec;

#[derive(Debug, Copy, Clone, PartialEq)]
enum State {
    TagBit,          /* tag bit */
    YieldLiteral,    /* ready to yield literal byte */
    BackrefIndexMsb, /* most significant bits of index */
    BackrefIndexLsb, /* least significant bits of index */
    BackrefCountMsb, /* most significant bits of count */
    BackrefCountLsb, /* least significant bits of count */
    YieldBackref,    /* ready to yield back-reference */
}

/// Return code for a sink function call
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SinkRes {
    /// Bytes were copied into the internal buffer; holds how many of them
    /// were actually accepted
    Ok(usize),
    /// The internal buffer is full; poll before sinking more
    Full,
    /// The input slice was empty
    ErrorNull,
}

/// Return code for a poll function call
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PollRes {
    /// Input is exhausted; holds the number of bytes produced
    Empty(usize),
    /// The output buffer filled before the input was exhausted; holds the
    /// number of bytes produced
    More(usize),
    /// The output slice was empty
    ErrorNull,
    /// The state machine reached a node that should be unreachable
    ErrorUnknown,
}

/// Return code for a finish function call
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FinishRes {
    /// More data available in the internal buffer; keep polling
    More,
    /// Operation is done
    Done,
}

/// The decoder instance.
///
/// Generic over the byte region `B` holding the input buffer followed by
/// the expansion window, `input_buffer_size + (1 << window_sz2)` bytes in
/// total. Use [`Decoder::new`] to have the region heap allocated, or
/// [`Decoder::with_buffer`] to supply it (for example from a static
/// buffer).
#[derive(Debug)]
pub struct Decoder<B> {
    input_size: usize,
    input_index: usize,
    output_count: u16,
    output_index: u16,
    head_index: u16,
    current_byte: u8,
    bit_index: u8,
    window_sz2: u8,
    lookahead_sz2: u8,
    input_buffer_size: usize,
    state: State,
    buffers: B,
}

/// uncompress the src buffer to the destination buffer
#[cfg(feature = "alloc")]
pub fn decode<'a>(
    src: &[u8],
    dst: &'a mut [u8],
    input_buffer_size: u16,
    window_sz2: u8,
    lookahead_sz2: u8,
) -> Result<&'a [u8], Error> {
    let mut dec =
        Decoder::new(input_buffer_size, window_sz2, lookahead_sz2).map_err(Error::Config)?;
    let mut total_input_size = 0;
    let mut total_output_size = 0;

    while total_input_size < src.len() {
        // Fill the input buffer from the src buffer
        match dec.sink(&src[total_input_size..]) {
            SinkRes::Ok(segment_input_size) => total_input_size += segment_input_size,
            SinkRes::Full => {}
            SinkRes::ErrorNull => return Err(Error::Internal),
        }

        // process the current input buffer
        loop {
            if total_output_size == dst.len() {
                return Err(Error::OutputFull);
            }
            match dec.poll(&mut dst[total_output_size..]) {
                PollRes::Empty(segment_output_size) => {
                    total_output_size += segment_output_size;
                    break;
                }
                PollRes::More(segment_output_size) => total_output_size += segment_output_size,
                PollRes::ErrorNull | PollRes::ErrorUnknown => return Err(Error::Internal),
            }
        }
    }

    // the src buffer is consumed, drain any suspended back-reference
    loop {
        if let FinishRes::Done = dec.finish() {
            break;
        }
        loop {
            if total_output_size == dst.len() {
                return Err(Error::OutputFull);
            }
            match dec.poll(&mut dst[total_output_size..]) {
                PollRes::Empty(segment_output_size) => {
                    total_output_size += segment_output_size;
                    break;
                }
                PollRes::More(segment_output_size) => total_output_size += segment_output_size,
                PollRes::ErrorNull | PollRes::ErrorUnknown => return Err(Error::Internal),
            }
        }
    }

    Ok(&dst[..total_output_size])
}

#[cfg(feature = "alloc")]
impl Decoder<Box<[u8]>> {
    /// Create a new decoder instance with heap allocated buffers: an
    /// input buffer of `input_buffer_size` bytes and an expansion window
    /// of `1 << window_sz2` bytes.
    pub fn new(
        input_buffer_size: u16,
        window_sz2: u8,
        lookahead_sz2: u8,
    ) -> Result<Self, ConfigError> {
        check_window_config(window_sz2, lookahead_sz2)?;
        if input_buffer_size == 0 {
            return Err(ConfigError::InputBufferSize);
        }
        let buffers = vec![0; usize::from(input_buffer_size) + (1 << window_sz2)];
        Self::with_buffer(buffers.into_boxed_slice(), input_buffer_size, window_sz2, lookahead_sz2)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Decoder<B> {
    /// Create a new decoder instance operating on a caller supplied
    /// buffer, which must be `input_buffer_size + (1 << window_sz2)`
    /// bytes long.
    pub fn with_buffer(
        buffers: B,
        input_buffer_size: u16,
        window_sz2: u8,
        lookahead_sz2: u8,
    ) -> Result<Self, ConfigError> {
        check_window_config(window_sz2, lookahead_sz2)?;
        if input_buffer_size == 0 {
            return Err(ConfigError::InputBufferSize);
        }
        if buffers.as_ref().len() != usize::from(input_buffer_size) + (1 << window_sz2) {
            return Err(ConfigError::BufferSize);
        }
        Ok(Decoder {
            input_size: 0,
            input_index: 0,
            output_count: 0,
            output_index: 0,
            head_index: 0,
            current_byte: 0,
            bit_index: 0,
            window_sz2,
            lookahead_sz2,
            input_buffer_size: input_buffer_size.into(),
            state: State::TagBit,
            buffers,
        })
    }

    /// Reset the current decoder instance so it can expand a new stream.
    /// The window is cleared; back-references never reach into a previous
    /// stream.
    pub fn reset(&mut self) {
        self.input_size = 0;
        self.input_index = 0;
        self.output_count = 0;
        self.output_index = 0;
        self.head_index = 0;
        self.current_byte = 0;
        self.bit_index = 0;
        self.state = State::TagBit;
        self.buffers.as_mut().iter_mut().for_each(|m| *m = 0);
    }

    /// Add an input buffer to be processed/uncompressed. Returns the
    /// number of bytes actually accepted, which is short when the
    /// internal buffer fills first.
    pub fn sink(&mut self, input_buffer: &[u8]) -> SinkRes {
        if input_buffer.is_empty() {
            return SinkRes::ErrorNull;
        }

        let remaining_size = self.input_buffer_size - self.input_size;
        if remaining_size == 0 {
            return SinkRes::Full;
        }

        let copy_size = remaining_size.min(input_buffer.len());
        self.buffers.as_mut()[self.input_size..self.input_size + copy_size]
            .copy_from_slice(&input_buffer[..copy_size]);
        self.input_size += copy_size;

        SinkRes::Ok(copy_size)
    }

    /// function to process the input/internal buffer and put the
    /// uncompressed stream in the provided buffer.
    pub fn poll(&mut self, output_buffer: &mut [u8]) -> PollRes {
        if output_buffer.is_empty() {
            return PollRes::ErrorNull;
        }

        let mut output_size = 0;
        let mut output_info = OutputInfo::new(output_buffer, &mut output_size);

        loop {
            let in_state = self.state;

            match in_state {
                State::TagBit => {
                    self.state = self.st_tag_bit();
                }
                State::YieldLiteral => {
                    self.state = self.st_yield_literal(&mut output_info);
                }
                State::BackrefIndexMsb => {
                    self.state = self.st_backref_index_msb();
                }
                State::BackrefIndexLsb => {
                    self.state = self.st_backref_index_lsb();
                }
                State::BackrefCountMsb => {
                    self.state = self.st_backref_count_msb();
                }
                State::BackrefCountLsb => {
                    self.state = self.st_backref_count_lsb();
                }
                State::YieldBackref => {
                    self.state = self.st_yield_backref(&mut output_info);
                }
            }

            // If the current state cannot advance, either the input or
            // the output buffer is exhausted.
            if self.state == in_state {
                if output_info.can_take_byte() {
                    return PollRes::Empty(output_size);
                }
                return PollRes::More(output_size);
            }
        }
    }

    /// Signal the end of the input stream.
    ///
    /// Returns `More` while polling can still produce output.
    pub fn finish(&self) -> FinishRes {
        match self.state {
            // Stuck in the middle of a token with no input left: the
            // encoder pads the final byte with zero bits, which read as
            // the start of a back-reference that never completes. That is
            // the regular end of a stream.
            State::TagBit
            | State::YieldLiteral
            | State::BackrefIndexMsb
            | State::BackrefIndexLsb
            | State::BackrefCountMsb
            | State::BackrefCountLsb => {
                if self.input_size == 0 {
                    FinishRes::Done
                } else {
                    FinishRes::More
                }
            }
            // A suspended back-reference still has bytes to emit.
            State::YieldBackref => FinishRes::More,
        }
    }

    fn st_tag_bit(&mut self) -> State {
        match self.get_bits(1) {
            None => State::TagBit,
            Some(0) => {
                if self.window_sz2 > 8 {
                    State::BackrefIndexMsb
                } else {
                    self.output_index = 0;
                    State::BackrefIndexLsb
                }
            }
            Some(_) => State::YieldLiteral,
        }
    }

    fn st_yield_literal(&mut self, output_info: &mut OutputInfo) -> State {
        // Emit a literal byte and record it in the window so later
        // back-references can repeat it.
        if output_info.can_take_byte() {
            match self.get_bits(8) {
                None => State::YieldLiteral, /* input_buffer is consumed */
                Some(bits) => {
                    let c = (bits & 0xff) as u8;
                    let mask = self.window_size() - 1;
                    let window_offset = self.input_buffer_size;
                    self.buffers.as_mut()[window_offset + (usize::from(self.head_index) & mask)] =
                        c;
                    self.head_index = self.head_index.wrapping_add(1);
                    output_info.push_byte(c);
                    State::TagBit
                }
            }
        } else {
            State::YieldLiteral
        }
    }

    fn st_backref_index_msb(&mut self) -> State {
        match self.get_bits(self.window_sz2 - 8) {
            None => State::BackrefIndexMsb,
            Some(bits) => {
                self.output_index = bits << 8;
                State::BackrefIndexLsb
            }
        }
    }

    fn st_backref_index_lsb(&mut self) -> State {
        match self.get_bits(self.window_sz2.min(8)) {
            None => State::BackrefIndexLsb,
            Some(bits) => {
                self.output_index |= bits;
                self.output_index += 1;
                self.output_count = 0;
                if self.lookahead_sz2 > 8 {
                    State::BackrefCountMsb
                } else {
                    State::BackrefCountLsb
                }
            }
        }
    }

    fn st_backref_count_msb(&mut self) -> State {
        match self.get_bits(self.lookahead_sz2 - 8) {
            None => State::BackrefCountMsb,
            Some(bits) => {
                self.output_count = bits << 8;
                State::BackrefCountLsb
            }
        }
    }

    fn st_backref_count_lsb(&mut self) -> State {
        match self.get_bits(self.lookahead_sz2.min(8)) {
            None => State::BackrefCountLsb,
            Some(bits) => {
                self.output_count |= bits;
                self.output_count += 1;
                State::YieldBackref
            }
        }
    }

    fn st_yield_backref(&mut self, output_info: &mut OutputInfo) -> State {
        let mut count = output_info.remaining_free_size();

        if count > 0 {
            if usize::from(self.output_count) < count {
                count = self.output_count.into();
            }

            // The copy may overlap itself: a distance-1 back-reference
            // repeats the byte it is writing, so this stays byte by byte.
            let mask = self.window_size() - 1;
            let window = &mut self.buffers.as_mut()[self.input_buffer_size..];
            let distance = usize::from(self.output_index);

            for _ in 0..count {
                let head = usize::from(self.head_index);
                let c = window[head.wrapping_sub(distance) & mask];
                window[head & mask] = c;
                output_info.push_byte(c);
                self.head_index = self.head_index.wrapping_add(1);
            }

            self.output_count -= count as u16;
            if self.output_count == 0 {
                return State::TagBit;
            }
        }
        State::YieldBackref
    }

    /// Get the next COUNT bits from the input buffer, saving incremental
    /// progress. Returns None on end of input, or if more than 15 bits
    /// are requested.
    fn get_bits(&mut self, count: u8) -> Option<u16> {
        if count > 15 {
            return None;
        }

        // If we can't supply COUNT bits, suspend immediately; partial
        // progress within a field is not tracked across calls.
        if self.input_size == 0 && u16::from(self.bit_index) < (1 << (count - 1)) {
            return None;
        }

        let mut accumulator = 0;
        for _ in 0..count {
            if self.bit_index == 0 {
                if self.input_size == 0 {
                    return None;
                }
                self.current_byte = self.buffers.as_ref()[self.input_index];
                self.input_index += 1;
                if self.input_index == self.input_size {
                    /* input buffer is consumed */
                    self.input_index = 0;
                    self.input_size = 0;
                }
                self.bit_index = 0x80;
            }
            accumulator <<= 1;
            if self.current_byte & self.bit_index != 0 {
                accumulator |= 0x1;
            }
            self.bit_index >>= 1;
        }

        Some(accumulator)
    }

    fn window_size(&self) -> usize {
        1 << self.window_sz2
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode_to_vec(src: &[u8], window_sz2: u8, lookahead_sz2: u8) -> Vec<u8> {
        let mut dst = vec![0; 1024];
        let len = decode(src, &mut dst, 32, window_sz2, lookahead_sz2)
            .expect("decoding failed")
            .len();
        dst.truncate(len);
        dst
    }

    #[test]
    fn known_stream_expands_byte_for_byte() {
        let src = hex_literal::hex!("90D4B2B549A4082BE00F000E4C46DF2817C605F005B4BE0825F00280");
        let mut expected = [0; 84];
        expected[..6].copy_from_slice(&hex_literal::hex!("215295543402"));
        expected[40..42].copy_from_slice(&hex_literal::hex!("9302"));
        expected[48..54].copy_from_slice(&hex_literal::hex!("F202F102F002"));
        expected[60..62].copy_from_slice(&hex_literal::hex!("2F04"));
        assert_eq!(decode_to_vec(&src, 8, 4), expected);
    }

    #[test]
    fn literal_then_backref() {
        // 'a' as a literal, then distance 1, length 4: "aaaaa".
        let src = [0xb0, 0x80, 0x01, 0x80];
        assert_eq!(decode_to_vec(&src, 8, 7), b"aaaaa");
    }

    #[test]
    fn backref_before_history_reads_zeros() {
        // Tag 0, distance 6, length 3 against an untouched window.
        let mut dec = Decoder::new(16, 8, 4).unwrap();
        let mut out = [0xff; 8];
        assert_eq!(dec.sink(&[0x02, 0x90]), SinkRes::Ok(2));
        assert_eq!(dec.poll(&mut out), PollRes::Empty(3));
        assert_eq!(out[..3], [0, 0, 0]);
    }

    #[test]
    fn truncated_literal_is_silently_dropped() {
        // A lone 0xA0 carries the literal tag and seven of eight payload
        // bits; finishing there ends the stream with no output.
        let mut dec = Decoder::new(16, 8, 4).unwrap();
        assert_eq!(dec.sink(&[0xa0]), SinkRes::Ok(1));
        let mut out = [0; 8];
        assert_eq!(dec.poll(&mut out), PollRes::Empty(0));
        assert_eq!(dec.finish(), FinishRes::Done);
    }

    #[test]
    fn finish_with_pending_input_wants_polling() {
        let mut dec = Decoder::new(16, 8, 4).unwrap();
        assert_eq!(dec.sink(&[0xa0, 0x80]), SinkRes::Ok(2));
        assert_eq!(dec.finish(), FinishRes::More);
        let mut out = [0; 8];
        assert_eq!(dec.poll(&mut out), PollRes::Empty(1));
        assert_eq!(out[0], b'A');
        assert_eq!(dec.finish(), FinishRes::Done);
    }

    #[test]
    fn output_buffer_of_one_byte_suspends_backref() {
        let src = [0xb0, 0x80, 0x01, 0x80]; // "aaaaa"
        let mut dec = Decoder::new(16, 8, 7).unwrap();
        assert_eq!(dec.sink(&src), SinkRes::Ok(4));

        let mut collected = Vec::new();
        loop {
            let mut byte = [0];
            match dec.poll(&mut byte) {
                PollRes::Empty(count) => {
                    collected.extend_from_slice(&byte[..count]);
                    break;
                }
                PollRes::More(count) => collected.extend_from_slice(&byte[..count]),
                other => panic!("poll failed: {:?}", other),
            }
        }
        assert_eq!(collected, b"aaaaa");
    }

    #[test]
    fn sink_reports_full_buffer() {
        let mut dec = Decoder::new(4, 8, 4).unwrap();
        assert_eq!(dec.sink(&[0; 10]), SinkRes::Ok(4));
        assert_eq!(dec.sink(&[0; 10]), SinkRes::Full);
        assert_eq!(dec.sink(&[]), SinkRes::ErrorNull);
    }

    #[test]
    fn reset_clears_window_history() {
        let src = [0xb0, 0x80, 0x01, 0x80];
        let mut dec = Decoder::new(16, 8, 7).unwrap();
        let mut out = [0; 16];

        assert_eq!(dec.sink(&src), SinkRes::Ok(4));
        assert_eq!(dec.poll(&mut out), PollRes::Empty(5));
        dec.reset();

        // A back-reference into the cleared window reads zeros, not the
        // previous stream.
        assert_eq!(dec.sink(&[0x00, 0x02]), SinkRes::Ok(2));
        assert_eq!(dec.poll(&mut out), PollRes::Empty(3));
        assert_eq!(out[..3], [0, 0, 0]);
    }

    #[test]
    fn config_validation() {
        assert_eq!(Decoder::new(0, 8, 4).unwrap_err(), ConfigError::InputBufferSize);
        assert_eq!(Decoder::new(16, 2, 4).unwrap_err(), ConfigError::WindowBits);
        assert_eq!(Decoder::new(16, 8, 2).unwrap_err(), ConfigError::LookaheadBits);
        assert_eq!(
            Decoder::with_buffer([0; 64], 16, 8, 4).unwrap_err(),
            ConfigError::BufferSize
        );
        assert!(Decoder::with_buffer([0; 272], 16, 8, 4).is_ok());
    }

    #[test]
    fn wide_window_fields_split_across_states() {
        // W = 11 makes the distance field span the MSB and LSB states.
        let compressed = {
            let mut dst = vec![0; 256];
            let src: Vec<u8> = b"abcdefgh".iter().cycle().take(128).copied().collect();
            let len = crate::encoder::encode(&src, &mut dst, 11, 9)
                .unwrap()
                .len();
            dst.truncate(len);
            dst
        };
        let src: Vec<u8> = b"abcdefgh".iter().cycle().take(128).copied().collect();
        let mut dst = vec![0; 256];
        let out = decode(&compressed, &mut dst, 8, 11, 9).unwrap();
        assert_eq!(out, src);
    }
}
