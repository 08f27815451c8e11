use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{cli::ClientArgs, protocol::write_line};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut server_lines, mut writer) = establish_connection(&args).await?;

    if let Some(name) = &args.name {
        write_line(&mut writer, name)
            .await
            .context("failed to send display name")?;
    }

    let mut input = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();
    let end = select! {
        end = relay(&mut server_lines, &mut writer, &mut input, &mut stdout) => end?,
        ctrl_c = tokio::signal::ctrl_c() => {
            handle_ctrl_c(ctrl_c);
            RelayEnd::Interrupted
        }
    };

    if end == RelayEnd::ServerClosed {
        write_line(&mut io::stderr(), "*** server closed the connection").await?;
    }
    shutdown_connection(&mut writer).await;

    Ok(())
}

/// Which side stopped the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    InputClosed,
    ServerClosed,
    Interrupted,
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf)> {
    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;

    info!("connected to {}:{}", args.host, args.port);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader).lines(), writer))
}

/// Copies server lines to `output` and `input` lines to the server until
/// either side reaches end of stream.
pub async fn relay<SR, SW, IR, OW>(
    server_lines: &mut Lines<SR>,
    server_writer: &mut SW,
    input: &mut Lines<IR>,
    output: &mut OW,
) -> Result<RelayEnd>
where
    SR: AsyncBufRead + Unpin,
    SW: AsyncWrite + Unpin,
    IR: AsyncBufRead + Unpin,
    OW: AsyncWrite + Unpin,
{
    loop {
        select! {
            from_server = server_lines.next_line() => {
                match from_server.context("failed to read from server")? {
                    Some(line) => write_line(output, &line).await?,
                    None => return Ok(RelayEnd::ServerClosed),
                }
            }
            from_input = input.next_line() => {
                match from_input.context("failed to read input")? {
                    Some(line) => write_line(server_writer, &line)
                        .await
                        .context("failed to send line to server")?,
                    None => return Ok(RelayEnd::InputClosed),
                }
            }
        }
    }
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}
