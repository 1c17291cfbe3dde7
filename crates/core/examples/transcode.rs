//! Decodes the best video stream, scales it, and re-encodes with libx264
//! into a new container — the video-transcode-with-scale seed scenario.

use std::sync::Arc;

use avflow::decoder::Decoder;
use avflow::encoder::{Encoder, EncoderOptions};
use avflow::filter::FilterApi;
use avflow::input::MediaInput;
use avflow::media_info::{CodecParameters, VideoCodecFields};
use avflow::output::MediaOutput;
use avflow::pipeline::{pipeline_simple, OutputStreamSpec, PipelineSink, PipelineSource, PipelineSpec, PipelineStage};

const SCALE_WIDTH: u32 = 320;
const SCALE_HEIGHT: u32 = 240;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    avflow::init()?;

    let args: Vec<String> = std::env::args().collect();
    let input_path = args.get(1).cloned().unwrap_or_else(|| "demux.mp4".to_string());
    let output_path = args.get(2).cloned().unwrap_or_else(|| "transcode.mp4".to_string());

    let input = MediaInput::open(&input_path)?;
    let video_stream = input.video()?;
    let decoder = Decoder::from_codec_parameters(&video_stream.codec_parameters)?;

    // The format the filter's buffer source is configured with: the
    // decoder's output carries the stream's original geometry and time base
    // until the `scale` filter changes it downstream.
    let input_info = video_stream.media_info()?;
    let filter = FilterApi::new("scale=320:240", input_info);

    let encoder_options = EncoderOptions {
        bitrate: Some("500k".parse()?),
        gop_size: Some(30),
        ..EncoderOptions::default()
    };
    let encoder = Encoder::new("libx264", input_info, encoder_options.clone())?;

    let output = Arc::new(MediaOutput::create(&output_path)?);

    // One output stream, added to `output` and write_header'd by the
    // pipeline's priming phase, whose resulting index is handed to the
    // encoder stage below before the first packet is pulled.
    let output_streams = vec![OutputStreamSpec {
        codec_parameters: CodecParameters {
            codec_id: ffmpeg_next::codec::Id::H264,
            codec_type: ffmpeg_next::media::Type::Video,
            video: Some(VideoCodecFields {
                width: SCALE_WIDTH,
                height: SCALE_HEIGHT,
                pixel_format: match input_info {
                    avflow::MediaInfo::Video { pixel_format, .. } => pixel_format,
                    avflow::MediaInfo::Audio { .. } => unreachable!("video stream yields MediaInfo::Video"),
                },
            }),
            audio: None,
            extradata: Vec::new(),
        },
        time_base: encoder_options.time_base,
    }];

    let spec = PipelineSpec {
        source: PipelineSource::Demuxer(input),
        stages: vec![
            PipelineStage::Decoder(decoder),
            PipelineStage::Filter(filter),
            PipelineStage::Encoder(encoder),
        ],
        sink: PipelineSink::Muxer(output),
        output_streams,
    };

    let mut control = pipeline_simple(spec).await;
    control.completion().await?;
    println!("transcode complete: {output_path}");
    Ok(())
}
