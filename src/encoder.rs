use crate::check_window_config;
use crate::ConfigError;
#[cfg(feature = "alloc")]
use crate::Error;
use crate::OutputInfo;

#[cfg(feature = "alloc")]
use alloc::boxed::Box;
#[cfg(feature = "alloc")]
use alloc::vec;

/// Largest window exponent the search index can address with 16 bit
/// links. Wider windows silently fall back to the linear scan.
#[cfg(feature = "index")]
const INDEX_MAX_WINDOW_BITS: u8 = 14;

#[derive(Debug, Copy, Clone, PartialEq)]
enum State {
    NotFull,       /* input buffer not full enough */
    Filled,        /* buffer is full */
    Search,        /* searching for patterns */
    YieldTagBit,   /* yield tag bit */
    YieldLiteral,  /* emit literal byte */
    YieldBrIndex,  /* yielding backref index */
    YieldBrLength, /* yielding backref length */
    SaveBacklog,   /* copying buffer to backlog */
    FlushBits,     /* flush bit buffer */
    Done,          /* done */
}

/// Return code for a sink function call
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SinkRes {
    /// Bytes were copied into the internal buffer; holds how many of them
    /// were actually accepted
    Ok(usize),
    /// The input slice was empty
    ErrorNull,
    /// The instance is finishing, or has unprocessed input; poll first
    ErrorMisuse,
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
}

/// Return code for a finish function call
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FinishRes {
    /// More data available in the internal buffer; keep polling
    More,
    /// Operation is done
    Done,
}

/// The encoder instance.
///
/// Generic over the byte region `B` backing the sliding window, which
/// must hold `2 * (1 << window_sz2)` bytes: the low half is
/// already-processed history, the high half accumulates sunk bytes
/// awaiting processing. Use [`Encoder::new`] to have the region heap
/// allocated, or [`Encoder::with_buffer`] to supply it (for example from
/// a static buffer).
#[derive(Debug)]
pub struct Encoder<B> {
    input_size: usize,
    match_scan_index: usize,
    match_length: usize,
    match_pos: u16,
    outgoing_bits: u16,
    outgoing_bits_count: u8,
    finishing: bool,
    current_byte: u8,
    bit_index: u8,
    window_sz2: u8,
    lookahead_sz2: u8,
    state: State,
    #[cfg(feature = "index")]
    search_index: Option<Box<[i16]>>,
    buffer: B,
}

/// compress the src buffer to the destination buffer
#[cfg(feature = "alloc")]
pub fn encode<'a>(
    src: &[u8],
    dst: &'a mut [u8],
    window_sz2: u8,
    lookahead_sz2: u8,
) -> Result<&'a [u8], Error> {
    let mut enc = Encoder::new(window_sz2, lookahead_sz2).map_err(Error::Config)?;
    let mut total_input_size = 0;
    let mut total_output_size = 0;

    while total_input_size < src.len() {
        // Fill the input buffer from the src buffer
        match enc.sink(&src[total_input_size..]) {
            SinkRes::Ok(segment_input_size) => total_input_size += segment_input_size,
            SinkRes::ErrorNull | SinkRes::ErrorMisuse => return Err(Error::Internal),
        }

        // process the current input buffer
        loop {
            if total_output_size == dst.len() {
                return Err(Error::OutputFull);
            }
            match enc.poll(&mut dst[total_output_size..]) {
                PollRes::Empty(segment_output_size) => {
                    total_output_size += segment_output_size;
                    break;
                }
                PollRes::More(segment_output_size) => total_output_size += segment_output_size,
                PollRes::ErrorNull => return Err(Error::Internal),
            }
        }
    }

    // the src buffer is consumed, flush the remaining bit stream
    loop {
        if let FinishRes::Done = enc.finish() {
            break;
        }
        loop {
            if total_output_size == dst.len() {
                return Err(Error::OutputFull);
            }
            match enc.poll(&mut dst[total_output_size..]) {
                PollRes::Empty(segment_output_size) => {
                    total_output_size += segment_output_size;
                    break;
                }
                PollRes::More(segment_output_size) => total_output_size += segment_output_size,
                PollRes::ErrorNull => return Err(Error::Internal),
            }
        }
    }

    Ok(&dst[..total_output_size])
}

#[cfg(feature = "alloc")]
impl Encoder<Box<[u8]>> {
    /// Create a new encoder instance with heap allocated buffers: a
    /// `1 << window_sz2` byte window for previous input to draw
    /// back-references from, plus as much again for input being
    /// processed.
    pub fn new(window_sz2: u8, lookahead_sz2: u8) -> Result<Self, ConfigError> {
        check_window_config(window_sz2, lookahead_sz2)?;
        let buffer = vec![0; 2 << window_sz2].into_boxed_slice();
        Self::with_buffer(buffer, window_sz2, lookahead_sz2)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Encoder<B> {
    /// Create a new encoder instance operating on a caller supplied
    /// buffer, which must be `2 << window_sz2` bytes long.
    pub fn with_buffer(buffer: B, window_sz2: u8, lookahead_sz2: u8) -> Result<Self, ConfigError> {
        check_window_config(window_sz2, lookahead_sz2)?;
        if buffer.as_ref().len() != 2 << window_sz2 {
            return Err(ConfigError::BufferSize);
        }
        Ok(Encoder {
            input_size: 0,
            match_scan_index: 0,
            match_length: 0,
            match_pos: 0,
            outgoing_bits: 0,
            outgoing_bits_count: 0,
            finishing: false,
            current_byte: 0,
            bit_index: 0x80,
            window_sz2,
            lookahead_sz2,
            state: State::NotFull,
            #[cfg(feature = "index")]
            search_index: new_search_index(window_sz2),
            buffer,
        })
    }

    /// Reset the current encoder instance so it can compress a new
    /// stream. The window is cleared; back-references never reach into a
    /// previous stream.
    pub fn reset(&mut self) {
        self.input_size = 0;
        self.match_scan_index = 0;
        self.match_length = 0;
        self.match_pos = 0;
        self.outgoing_bits = 0;
        self.outgoing_bits_count = 0;
        self.finishing = false;
        self.current_byte = 0;
        self.bit_index = 0x80;
        self.state = State::NotFull;
        self.buffer.as_mut().iter_mut().for_each(|m| *m = 0);
        #[cfg(feature = "index")]
        if let Some(index) = self.search_index.as_mut() {
            index.iter_mut().for_each(|m| *m = 0);
        }
    }

    /// Add an input buffer to be processed/compressed. Returns the number
    /// of bytes actually accepted, which is short when the internal
    /// buffer fills first.
    pub fn sink(&mut self, input_buffer: &[u8]) -> SinkRes {
        if input_buffer.is_empty() {
            return SinkRes::ErrorNull;
        }

        /* Sinking more content after saying the content is done */
        if self.finishing {
            return SinkRes::ErrorMisuse;
        }

        /* Sinking more content before processing is done */
        if self.state != State::NotFull {
            return SinkRes::ErrorMisuse;
        }

        let write_offset = self.input_offset() + self.input_size;
        let remaining_size = self.input_buffer_size() - self.input_size;
        let copy_size = remaining_size.min(input_buffer.len());

        self.buffer.as_mut()[write_offset..write_offset + copy_size]
            .copy_from_slice(&input_buffer[..copy_size]);
        self.input_size += copy_size;

        if self.input_size == self.input_buffer_size() {
            self.state = State::Filled;
        }

        SinkRes::Ok(copy_size)
    }

    /// function to process the input/internal buffer and put the
    /// compressed stream in the provided buffer.
    pub fn poll(&mut self, output_buffer: &mut [u8]) -> PollRes {
        if output_buffer.is_empty() {
            return PollRes::ErrorNull;
        }

        let mut output_size = 0;
        let mut output_info = OutputInfo::new(output_buffer, &mut output_size);

        loop {
            let in_state = self.state;

            match in_state {
                State::NotFull | State::Done => return PollRes::Empty(output_size),
                State::Filled => {
                    self.do_indexing();
                    self.state = State::Search;
                }
                State::Search => {
                    self.state = self.st_step_search();
                }
                State::YieldTagBit => {
                    self.state = self.st_yield_tag_bit(&mut output_info);
                }
                State::YieldLiteral => {
                    self.state = self.st_yield_literal(&mut output_info);
                }
                State::YieldBrIndex => {
                    self.state = self.st_yield_br_index(&mut output_info);
                }
                State::YieldBrLength => {
                    self.state = self.st_yield_br_length(&mut output_info);
                }
                State::SaveBacklog => {
                    self.state = self.st_save_backlog();
                }
                State::FlushBits => {
                    self.state = self.st_flush_bit_buffer(&mut output_info);
                }
            }

            // A state that cannot advance is blocked on output space.
            if self.state == in_state && !output_info.can_take_byte() {
                return PollRes::More(output_size);
            }
        }
    }

    /// Mark the end of the input stream. Returns `More` until a
    /// subsequent poll has drained the remaining bits.
    pub fn finish(&mut self) -> FinishRes {
        self.finishing = true;

        if self.state == State::NotFull {
            self.state = State::Filled;
        }

        if self.state == State::Done {
            FinishRes::Done
        } else {
            FinishRes::More
        }
    }

    fn st_step_search(&mut self) -> State {
        // While finishing, the lookahead shrinks to a single byte so the
        // tail of the stream is still emitted.
        let lookahead = if self.finishing {
            1
        } else {
            self.lookahead_size()
        };

        if self.match_scan_index + lookahead > self.input_size {
            return if self.finishing {
                State::FlushBits
            } else {
                State::SaveBacklog
            };
        }

        let end = self.input_offset() + self.match_scan_index;
        let start = end - self.input_buffer_size();
        let max_possible = self
            .lookahead_size()
            .min(self.input_size - self.match_scan_index);

        match self.find_longest_match(start, end, max_possible) {
            None => {
                self.match_scan_index += 1;
                self.match_length = 0;
            }
            Some((match_pos, match_length)) => {
                self.match_pos = match_pos;
                self.match_length = match_length as usize;
            }
        }
        State::YieldTagBit
    }

    fn st_yield_tag_bit(&mut self, output_info: &mut OutputInfo) -> State {
        if output_info.can_take_byte() {
            if self.match_length == 0 {
                self.add_tag_bit(output_info, 0x1);
                State::YieldLiteral
            } else {
                self.add_tag_bit(output_info, 0);
                self.outgoing_bits = self.match_pos - 1;
                self.outgoing_bits_count = self.window_sz2;
                State::YieldBrIndex
            }
        } else {
            State::YieldTagBit
        }
    }

    fn st_yield_literal(&mut self, output_info: &mut OutputInfo) -> State {
        if output_info.can_take_byte() {
            self.push_literal_byte(output_info);
            State::Search
        } else {
            State::YieldLiteral
        }
    }

    fn st_yield_br_index(&mut self, output_info: &mut OutputInfo) -> State {
        if output_info.can_take_byte() {
            if self.push_outgoing_bits(output_info) > 0 {
                State::YieldBrIndex
            } else {
                self.outgoing_bits = (self.match_length - 1) as u16;
                self.outgoing_bits_count = self.lookahead_sz2;
                State::YieldBrLength
            }
        } else {
            State::YieldBrIndex
        }
    }

    fn st_yield_br_length(&mut self, output_info: &mut OutputInfo) -> State {
        if output_info.can_take_byte() {
            if self.push_outgoing_bits(output_info) > 0 {
                State::YieldBrLength
            } else {
                self.match_scan_index += self.match_length;
                self.match_length = 0;
                State::Search
            }
        } else {
            State::YieldBrLength
        }
    }

    fn st_save_backlog(&mut self) -> State {
        self.save_backlog();
        State::NotFull
    }

    fn st_flush_bit_buffer(&mut self, output_info: &mut OutputInfo) -> State {
        if self.bit_index == 0x80 {
            State::Done
        } else if output_info.can_take_byte() {
            output_info.push_byte(self.current_byte);
            State::Done
        } else {
            State::FlushBits
        }
    }

    fn add_tag_bit(&mut self, output_info: &mut OutputInfo, tag: u8) {
        self.push_bits(1, tag, output_info)
    }

    fn input_offset(&self) -> usize {
        self.input_buffer_size()
    }

    fn input_buffer_size(&self) -> usize {
        1 << self.window_sz2
    }

    fn lookahead_size(&self) -> usize {
        1 << self.lookahead_sz2
    }

    /// Rebuild the search index over the window.
    ///
    /// The index holds, for every buffer position, the previous position
    /// holding the same byte value (or -1), flattening 256 linked lists
    /// into one array. Match candidates are then found by walking the
    /// chain for the first lookahead byte instead of scanning the whole
    /// window.
    fn do_indexing(&mut self) {
        #[cfg(feature = "index")]
        if let Some(index) = self.search_index.as_mut() {
            let mut last: [i16; 256] = [-1; 256];
            let data = self.buffer.as_ref();
            let end = data.len() / 2 + self.input_size;

            for (i, link) in index.iter_mut().enumerate().take(end) {
                let v: usize = data[i].into();
                *link = last[v];
                last[v] = i as i16;
            }
        }
    }

    fn find_longest_match(&self, start: usize, end: usize, maxlen: usize) -> Option<(u16, u16)> {
        let buffer = self.buffer.as_ref();
        let mut match_maxlen: usize = 0;
        let mut match_index: Option<usize> = None;

        #[cfg(feature = "index")]
        let chained = self.search_index.as_deref();
        #[cfg(not(feature = "index"))]
        let chained: Option<&[i16]> = None;

        if let Some(index) = chained {
            let mut pos = index[end];

            while pos >= start as i16 {
                let candidate = pos as usize;

                // A longer match than the current best must agree at
                // least at its final byte; check that first.
                if buffer[candidate + match_maxlen] != buffer[end + match_maxlen] {
                    pos = index[candidate];
                    continue;
                }

                let mut len = 1;
                while len < maxlen {
                    if buffer[candidate + len] != buffer[end + len] {
                        break;
                    }
                    len += 1;
                }

                if len > match_maxlen {
                    match_maxlen = len;
                    match_index = Some(candidate);
                    if len == maxlen {
                        break;
                    }
                }
                pos = index[candidate];
            }
        } else {
            // Brute force scan over the window, nearest candidates first
            // so that ties keep the shortest distance.
            let mut pos = end - 1;

            loop {
                if buffer[pos + match_maxlen] == buffer[end + match_maxlen]
                    && buffer[pos] == buffer[end]
                {
                    let mut len = 1;
                    while len < maxlen {
                        if buffer[pos + len] != buffer[end + len] {
                            break;
                        }
                        len += 1;
                    }
                    if len > match_maxlen {
                        match_maxlen = len;
                        match_index = Some(pos);
                        if len == maxlen {
                            break;
                        }
                    }
                }

                if pos == start {
                    break;
                }
                pos -= 1;
            }
        }

        // A back-reference costs tag + index + length bits; shorter
        // matches than that are emitted as literals.
        let break_even_point = usize::from(1 + self.window_sz2 + self.lookahead_sz2) / 8;

        match match_index {
            Some(index) if match_maxlen > break_even_point => {
                Some(((end - index) as u16, match_maxlen as u16))
            }
            _ => None,
        }
    }

    /// Drain up to 8 bits from the enqueued-bits register, which lets a
    /// window-wide field suspend across poll boundaries. Returns the
    /// number of bits moved.
    fn push_outgoing_bits(&mut self, output_info: &mut OutputInfo) -> u8 {
        let (count, bits) = if self.outgoing_bits_count > 8 {
            (8, (self.outgoing_bits >> (self.outgoing_bits_count - 8)) as u8)
        } else {
            (self.outgoing_bits_count, self.outgoing_bits as u8)
        };

        if count > 0 {
            self.push_bits(count, bits, output_info);
            self.outgoing_bits_count -= count;
        }

        count
    }

    /// Push COUNT bits into the output byte accumulator, most significant
    /// bit first, flushing whole bytes to the output buffer. Never emits
    /// more than one byte per call; callers check for output space first.
    fn push_bits(&mut self, count: u8, bits: u8, output_info: &mut OutputInfo) {
        debug_assert!(count <= 8);

        if count == 8 && self.bit_index == 0x80 {
            output_info.push_byte(bits);
        } else {
            for i in (0..count).rev() {
                if bits & (1 << i) != 0 {
                    self.current_byte |= self.bit_index;
                }
                self.bit_index >>= 1;
                if self.bit_index == 0 {
                    self.bit_index = 0x80;
                    output_info.push_byte(self.current_byte);
                    self.current_byte = 0;
                }
            }
        }
    }

    fn push_literal_byte(&mut self, output_info: &mut OutputInfo) {
        // The scan index was already advanced past the literal.
        let processed_offset = self.match_scan_index - 1;
        let c = self.buffer.as_ref()[self.input_offset() + processed_offset];
        self.push_bits(8, c, output_info);
    }

    /// Promote the window: processed bytes shift into the low half so
    /// they can serve as history for future matches, unprocessed bytes
    /// move to the front of the high half.
    fn save_backlog(&mut self) {
        let match_scan_index = self.match_scan_index;
        self.buffer.as_mut().copy_within(match_scan_index.., 0);
        self.match_scan_index = 0;
        self.input_size -= match_scan_index;
    }
}

#[cfg(feature = "index")]
fn new_search_index(window_sz2: u8) -> Option<Box<[i16]>> {
    if window_sz2 <= INDEX_MAX_WINDOW_BITS {
        Some(vec![0; 2 << window_sz2].into_boxed_slice())
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_to_vec(src: &[u8], window_sz2: u8, lookahead_sz2: u8) -> Vec<u8> {
        let mut dst = vec![0; src.len() * 2 + 16];
        let len = encode(src, &mut dst, window_sz2, lookahead_sz2)
            .expect("encoding failed")
            .len();
        dst.truncate(len);
        dst
    }

    #[test]
    fn literal_run_bit_packing() {
        // Five distinct literals: tag bit + byte value each, zero padded.
        assert_eq!(
            encode_to_vec(&[0, 1, 2, 3, 4], 8, 7),
            [0x80, 0x40, 0x60, 0x50, 0x38, 0x20]
        );
    }

    #[test]
    fn backref_bit_packing() {
        // One literal 'a', then a distance-1 length-4 back-reference.
        assert_eq!(encode_to_vec(b"aaaaa", 8, 7), [0xb0, 0x80, 0x01, 0x80]);
    }

    #[test]
    fn short_matches_stay_literal() {
        // The two zeros match window prehistory but are below the
        // break-even point, so all three bytes are literals.
        assert_eq!(encode_to_vec(&[0, 0, 4], 8, 7), [0x80, 0x40, 0x20, 0x80]);
    }

    #[test]
    fn sink_after_finish_is_misuse() {
        let mut enc = Encoder::new(8, 4).unwrap();
        assert_eq!(enc.sink(b"abc"), SinkRes::Ok(3));
        assert_eq!(enc.finish(), FinishRes::More);
        assert_eq!(enc.sink(b"def"), SinkRes::ErrorMisuse);
    }

    #[test]
    fn sink_with_unprocessed_input_is_misuse() {
        let mut enc = Encoder::new(4, 3).unwrap();
        // Fill the 16 byte input region completely.
        assert_eq!(enc.sink(&[7; 40]), SinkRes::Ok(16));
        assert_eq!(enc.sink(&[7; 8]), SinkRes::ErrorMisuse);

        // Draining the encoder makes room again.
        let mut out = [0; 64];
        assert!(matches!(enc.poll(&mut out), PollRes::Empty(_)));
        assert!(matches!(enc.sink(&[7; 8]), SinkRes::Ok(_)));
    }

    #[test]
    fn empty_arguments_are_rejected() {
        let mut enc = Encoder::new(8, 4).unwrap();
        assert_eq!(enc.sink(&[]), SinkRes::ErrorNull);
        assert_eq!(enc.poll(&mut []), PollRes::ErrorNull);
    }

    #[test]
    fn one_byte_output_buffer_suspends_mid_token() {
        let src: Vec<u8> = b"abcabcabcabc".iter().cycle().take(64).copied().collect();
        let mut reference = vec![0; 256];
        let reference = encode(&src, &mut reference, 8, 4).unwrap().to_vec();

        let mut enc = Encoder::new(8, 4).unwrap();
        let mut compressed = Vec::new();
        let mut sunk = 0;
        while sunk < src.len() {
            match enc.sink(&src[sunk..]) {
                SinkRes::Ok(count) => sunk += count,
                other => panic!("sink failed: {:?}", other),
            }
            loop {
                let mut byte = [0];
                match enc.poll(&mut byte) {
                    PollRes::Empty(count) => {
                        compressed.extend_from_slice(&byte[..count]);
                        break;
                    }
                    PollRes::More(count) => compressed.extend_from_slice(&byte[..count]),
                    other => panic!("poll failed: {:?}", other),
                }
            }
        }
        loop {
            if let FinishRes::Done = enc.finish() {
                break;
            }
            let mut byte = [0];
            match enc.poll(&mut byte) {
                PollRes::Empty(count) | PollRes::More(count) => {
                    compressed.extend_from_slice(&byte[..count])
                }
                other => panic!("poll failed: {:?}", other),
            }
        }

        assert_eq!(compressed, reference);
    }

    #[test]
    fn reset_allows_reuse() {
        let src = b"compress me twice";
        let mut enc = Encoder::new(8, 4).unwrap();

        let mut first = [0; 64];
        let mut second = [0; 64];
        let first = drive(&mut enc, src, &mut first);
        enc.reset();
        let second = drive(&mut enc, src, &mut second);
        assert_eq!(first, second);
    }

    fn drive<'a>(enc: &mut Encoder<Box<[u8]>>, src: &[u8], dst: &'a mut [u8]) -> &'a [u8] {
        let mut sunk = 0;
        let mut polled = 0;
        while sunk < src.len() {
            match enc.sink(&src[sunk..]) {
                SinkRes::Ok(count) => sunk += count,
                other => panic!("sink failed: {:?}", other),
            }
            loop {
                match enc.poll(&mut dst[polled..]) {
                    PollRes::Empty(count) => {
                        polled += count;
                        break;
                    }
                    PollRes::More(count) => polled += count,
                    other => panic!("poll failed: {:?}", other),
                }
            }
        }
        loop {
            if let FinishRes::Done = enc.finish() {
                break;
            }
            match enc.poll(&mut dst[polled..]) {
                PollRes::Empty(count) | PollRes::More(count) => polled += count,
                other => panic!("poll failed: {:?}", other),
            }
        }
        &dst[..polled]
    }

    #[test]
    fn caller_supplied_buffer() {
        let mut region = [0; 32];
        let mut enc = Encoder::with_buffer(&mut region[..], 4, 3).unwrap();
        assert_eq!(enc.sink(b"xyz"), SinkRes::Ok(3));

        assert_eq!(
            Encoder::with_buffer(&mut [0u8; 16][..], 4, 3).unwrap_err(),
            ConfigError::BufferSize
        );
    }

    #[test]
    fn config_validation() {
        assert_eq!(Encoder::new(3, 3).unwrap_err(), ConfigError::WindowBits);
        assert_eq!(Encoder::new(16, 4).unwrap_err(), ConfigError::WindowBits);
        assert_eq!(Encoder::new(8, 2).unwrap_err(), ConfigError::LookaheadBits);
        assert_eq!(Encoder::new(8, 9).unwrap_err(), ConfigError::LookaheadBits);
        assert!(Encoder::new(8, 8).is_ok());
    }

    #[test]
    fn empty_stream_finishes_immediately() {
        let mut enc = Encoder::new(8, 4).unwrap();
        assert_eq!(enc.finish(), FinishRes::More);
        let mut out = [0; 8];
        assert_eq!(enc.poll(&mut out), PollRes::Empty(0));
        assert_eq!(enc.finish(), FinishRes::Done);
    }
}
