use anyhow::{bail, Context, Result};
use bitpress::{decoder, encoder};
use clap::{ArgGroup, Parser};
use std::fs::File;
use std::io::{Read, Write};

const APP_BUFFER_SIZE: usize = 64 * 1024;
const DECODER_INPUT_BUFFER_SIZE: u16 = 4096;

#[derive(Parser)] // requires `derive` feature
#[clap(author, version, about, long_about = None)]
#[clap(group(ArgGroup::new("command").required(true).args(&["encode", "decode"])))]
struct Cli {
    #[clap(short = 'e', long = "encode", help = "Compress data")]
    encode: bool,

    #[clap(short = 'd', long = "decode", help = "Decompress data")]
    decode: bool,

    #[clap(
        short = 'w',
        long = "window",
        default_value_t = 8,
        help = "Window size exponent; the sliding window holds 2^BITS bytes"
    )]
    window: u8,

    #[clap(
        short = 'l',
        long = "lookahead",
        default_value_t = 4,
        help = "Lookahead size exponent; back-references span up to 2^BITS bytes"
    )]
    lookahead: u8,

    #[clap(
        short = 'v',
        long = "verbose",
        help = "Print input & output sizes, compression ratio, etc."
    )]
    verbose: bool,

    /// some regular input
    input_file: String,

    /// some regular output
    output_file: String,
}

fn report(file_name: &str, input_file: &File, output_file: &File, args: &Cli) -> Result<()> {
    // size of the input file
    let input_len = input_file.metadata()?.len();
    // size of the output file
    let output_len = output_file.metadata()?.len();

    println!(
        "{0:} {1:.2}% \t{2:} -> {3:} (-w {4:} -l {5:})",
        file_name,
        100.0 - (100.0 * output_len as f32) / input_len as f32,
        input_len,
        output_len,
        args.window,
        args.lookahead
    );
    Ok(())
}

fn encode(args: &Cli, mut input_file: &File, mut output_file: &File) -> Result<()> {
    let mut enc = encoder::Encoder::new(args.window, args.lookahead)
        .context("invalid compression parameters")?;
    let mut input_buffer = [0; APP_BUFFER_SIZE];
    let mut output_buffer = [0; APP_BUFFER_SIZE];

    loop {
        let input_bytes_read = input_file
            .read(&mut input_buffer)
            .context("reading input file")?;

        let mut pending = &input_buffer[..input_bytes_read];

        loop {
            if !pending.is_empty() {
                match enc.sink(pending) {
                    encoder::SinkRes::Ok(segment_input_size) => {
                        // Data has been added to the encoder.
                        // Let's try to process/poll it
                        pending = &pending[segment_input_size..];
                    }
                    res => bail!("compressor rejected input: {:?}", res),
                }
            }

            // process the current input buffer
            loop {
                match enc.poll(&mut output_buffer) {
                    encoder::PollRes::Empty(segment_output_size) => {
                        output_file
                            .write_all(&output_buffer[..segment_output_size])
                            .context("writing output file")?;
                        // The input buffer is consumed.
                        // Exit the poll loop.
                        break;
                    }
                    encoder::PollRes::More(segment_output_size) => {
                        output_file
                            .write_all(&output_buffer[..segment_output_size])
                            .context("writing output file")?;
                        // Some more data is available in the encoder.
                        // Let's loop.
                    }
                    res => bail!("compressor poll failed: {:?}", res),
                }
            }

            if pending.is_empty() {
                break;
            }
        }

        if input_bytes_read == 0 {
            // The input file is consumed, flush the remaining bit stream.
            loop {
                if let encoder::FinishRes::Done = enc.finish() {
                    return Ok(());
                }
                match enc.poll(&mut output_buffer) {
                    encoder::PollRes::Empty(segment_output_size)
                    | encoder::PollRes::More(segment_output_size) => {
                        output_file
                            .write_all(&output_buffer[..segment_output_size])
                            .context("writing output file")?;
                    }
                    res => bail!("compressor poll failed: {:?}", res),
                }
            }
        }
    }
}

fn decode(args: &Cli, mut input_file: &File, mut output_file: &File) -> Result<()> {
    let mut dec = decoder::Decoder::new(DECODER_INPUT_BUFFER_SIZE, args.window, args.lookahead)
        .context("invalid compression parameters")?;
    let mut input_buffer = [0; APP_BUFFER_SIZE];
    let mut output_buffer = [0; APP_BUFFER_SIZE];

    loop {
        let input_bytes_read = input_file
            .read(&mut input_buffer)
            .context("reading input file")?;

        let mut pending = &input_buffer[..input_bytes_read];

        loop {
            if !pending.is_empty() {
                match dec.sink(pending) {
                    decoder::SinkRes::Ok(segment_input_size) => {
                        pending = &pending[segment_input_size..];
                    }
                    decoder::SinkRes::Full => {
                        // No data was added because the internal buffer
                        // is already full; poll below to make room.
                    }
                    res => bail!("decompressor rejected input: {:?}", res),
                }
            }

            loop {
                match dec.poll(&mut output_buffer) {
                    decoder::PollRes::Empty(segment_output_size) => {
                        output_file
                            .write_all(&output_buffer[..segment_output_size])
                            .context("writing output file")?;
                        break;
                    }
                    decoder::PollRes::More(segment_output_size) => {
                        output_file
                            .write_all(&output_buffer[..segment_output_size])
                            .context("writing output file")?;
                    }
                    res => bail!("corrupt stream: {:?}", res),
                }
            }

            if pending.is_empty() {
                break;
            }
        }

        if input_bytes_read == 0 {
            // The input file is consumed, drain the decoder.
            loop {
                if let decoder::FinishRes::Done = dec.finish() {
                    return Ok(());
                }
                match dec.poll(&mut output_buffer) {
                    decoder::PollRes::Empty(segment_output_size)
                    | decoder::PollRes::More(segment_output_size) => {
                        output_file
                            .write_all(&output_buffer[..segment_output_size])
                            .context("writing output file")?;
                    }
                    res => bail!("corrupt stream: {:?}", res),
                }
            }
        }
    }
}

fn main() -> Result<()> {
    // parse the command line parameters
    let args = Cli::parse();

    // Open input file for read
    let input_file =
        File::open(&args.input_file).with_context(|| format!("opening {}", args.input_file))?;
    // Open output file for write
    let output_file = File::create(&args.output_file)
        .with_context(|| format!("creating {}", args.output_file))?;

    // Process the file
    if args.encode {
        encode(&args, &input_file, &output_file)?;
    } else {
        decode(&args, &input_file, &output_file)?;
    }

    // Output log if requested
    if args.verbose {
        report(&args.input_file, &input_file, &output_file, &args)?;
    }

    Ok(())
}
