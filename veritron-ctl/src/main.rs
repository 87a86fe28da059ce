use std::path::PathBuf;

use anyhow::{anyhow, Context};
use veritron_api::{
    AuthToken, Comment, CommentId, CommentSubmission, Error as ApiError, Item, NewSession,
    NewViewer, Uuid, ViewerId, VoteTally,
};

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long)]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Create a viewer (needs ADMIN_TOKEN)
    CreateViewer {
        /// Username
        name: String,

        /// Initial password
        initial_password: String,

        /// Url of the avatar picture
        #[structopt(long)]
        avatar: Option<String>,
    },

    /// Import an analysed news item from a json file (needs ADMIN_TOKEN)
    CreateItem { file: PathBuf },

    /// Open a session and print its token, to be set as VERITRON_TOKEN
    Login { name: String, password: String },

    /// Close the session of VERITRON_TOKEN
    Logout,

    /// List all items, newest first
    Items,

    /// Toggle the vote of the current viewer on an item
    Vote { item: Uuid },

    /// Comment on an item
    Comment { item: Uuid, text: String },

    /// List the comments of an item, newest first
    Comments { item: Uuid },
}

fn token_from_env(var: &str) -> anyhow::Result<AuthToken> {
    let tok = std::env::var(var).with_context(|| format!("retrieving {var} environment variable"))?;
    let tok = Uuid::try_parse(&tok).with_context(|| format!("parsing {var} as an auth token"))?;
    Ok(AuthToken(tok))
}

fn admin_token() -> anyhow::Result<AuthToken> {
    token_from_env("ADMIN_TOKEN")
}

fn viewer_token() -> anyhow::Result<AuthToken> {
    token_from_env("VERITRON_TOKEN")
}

async fn send<T>(req: reqwest::RequestBuilder) -> anyhow::Result<T>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let resp = req.send().await.context("sending request")?;
    let status = resp.status();
    let body = resp.bytes().await.context("reading response body")?;
    if !status.is_success() {
        return Err(match ApiError::parse(&body) {
            Ok(err) => anyhow::Error::new(err),
            Err(_) => anyhow!("server answered {status}: {}", String::from_utf8_lossy(&body)),
        });
    }
    // empty answers stand for ()
    let body = if body.is_empty() { &b"null"[..] } else { &body[..] };
    serde_json::from_slice(body).context("parsing server answer")
}

fn print_item(item: &Item) {
    println!(
        "{} [{} votes] {:?} {}% {} / {}",
        item.id.0,
        item.vote_count(),
        item.severity(),
        item.verdict_percentage(),
        item.category(),
        item.title,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = <Opt as structopt::StructOpt>::from_args();

    let client = reqwest::Client::new();

    match opt.cmd {
        Command::CreateViewer {
            name,
            initial_password,
            avatar,
        } => {
            let viewer = NewViewer::new(ViewerId(Uuid::new_v4()), name, avatar, initial_password)
                .context("hashing initial password")?;
            send::<()>(
                client
                    .post(format!("{}/api/admin/create-viewer", opt.host))
                    .json(&viewer)
                    .bearer_auth(admin_token()?.0),
            )
            .await?;
            println!("{}", viewer.id.0);
        }
        Command::CreateItem { file } => {
            let data = std::fs::read(&file).with_context(|| format!("reading {file:?}"))?;
            let mut item: serde_json::Value =
                serde_json::from_slice(&data).with_context(|| format!("parsing {file:?}"))?;
            let fields = item
                .as_object_mut()
                .ok_or_else(|| anyhow!("{file:?} does not hold a json object"))?;
            fields
                .entry("id")
                .or_insert_with(|| serde_json::json!(Uuid::new_v4()));
            let item: Item = send(
                client
                    .post(format!("{}/api/admin/create-item", opt.host))
                    .json(&item)
                    .bearer_auth(admin_token()?.0),
            )
            .await?;
            print_item(&item);
        }
        Command::Login { name, password } => {
            let tok: AuthToken = send(
                client
                    .post(format!("{}/api/auth", opt.host))
                    .json(&NewSession {
                        user: name,
                        password,
                    }),
            )
            .await?;
            println!("{}", tok.0);
        }
        Command::Logout => {
            send::<()>(
                client
                    .post(format!("{}/api/unauth", opt.host))
                    .bearer_auth(viewer_token()?.0),
            )
            .await?;
        }
        Command::Items => {
            let items: Vec<Item> = send(client.get(format!("{}/api/items", opt.host))).await?;
            for item in &items {
                print_item(item);
            }
        }
        Command::Vote { item } => {
            let tally: VoteTally = send(
                client
                    .post(format!("{}/api/item/{item}/toggle-vote", opt.host))
                    .bearer_auth(viewer_token()?.0),
            )
            .await?;
            println!("{} votes", tally.vote_count);
        }
        Command::Comment { item, text } => {
            let comment: Comment = send(
                client
                    .post(format!("{}/api/item/{item}/comments", opt.host))
                    .json(&CommentSubmission {
                        id: CommentId(Uuid::new_v4()),
                        text,
                    })
                    .bearer_auth(viewer_token()?.0),
            )
            .await?;
            println!("{}", comment.id.0);
        }
        Command::Comments { item } => {
            let comments: Vec<Comment> =
                send(client.get(format!("{}/api/item/{item}/comments", opt.host))).await?;
            for c in &comments {
                println!("{} {}: {}", c.created_at, c.author_id.0, c.text);
            }
        }
    }

    Ok(())
}
