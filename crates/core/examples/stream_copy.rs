//! Remuxes a container without re-encoding: open a source, copy its best
//! video and audio streams into a new container verbatim.

use std::sync::Arc;

use avflow::input::MediaInput;
use avflow::output::MediaOutput;
use avflow::pipeline::{pipeline_simple, OutputStreamSpec, PipelineSink, PipelineSource, PipelineSpec};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    avflow::init()?;

    let args: Vec<String> = std::env::args().collect();
    let input_path = args.get(1).cloned().unwrap_or_else(|| "input.mp4".to_string());
    let output_path = args.get(2).cloned().unwrap_or_else(|| "copy.mp4".to_string());

    let input = MediaInput::open(&input_path)?;
    let output = Arc::new(MediaOutput::create(&output_path)?);

    // Declared here, added to `output` and write_header'd by the pipeline's
    // priming phase before the first packet is pulled, in the same order
    // the demuxer enumerates them so stream indices line up untouched.
    let output_streams = input
        .streams()?
        .into_iter()
        .map(|stream| OutputStreamSpec {
            codec_parameters: stream.codec_parameters,
            time_base: stream.time_base,
        })
        .collect();

    let spec = PipelineSpec {
        source: PipelineSource::Demuxer(input),
        stages: Vec::new(),
        sink: PipelineSink::Muxer(output),
        output_streams,
    };

    let mut control = pipeline_simple(spec).await;
    control.completion().await?;
    println!("stream copy complete: {output_path}");
    Ok(())
}
