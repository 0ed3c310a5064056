
use std::collections::HashMap;
use std::path::PathBuf;

use bluffroom::config::{self, ClientConfig};
use bluffroom::net::api::{GameApi, QUESTION_PAGE_SIZE, UserUpdate};
use bluffroom::net::envelope::{self, ServerEvent};
use bluffroom::net::event_client::{EventClient, EventClientError};
use bluffroom::net::gateway::{ApiError, Gateway};
use bluffroom::net::types::{NewQuestion, Phase, RankingEntry, Room, RoomConfigPatch, RoomOptions};
use bluffroom::state::StateError;
use bluffroom::state::game::GameState;
use bluffroom::state::room::RoomState;
use bluffroom::state::rooms::{AUTO_REFRESH_INTERVAL, RoomListState};
use bluffroom::state::store::{FileStorage, SessionStore, StoreError};
use bluffroom::state::sync::{self, Applied};
use bluffroom::state::user::UserState;
use bluffroom::state::view::View;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("not signed in; run `bluff user create <name>` first")]
    NotSignedIn,
    #[error("not in a room; create or join one first")]
    NoRoom,
    #[error("no game session; start or follow a game first")]
    NoSession,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Events(#[from] EventClientError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("stdin read failed: {0}")]
    Stdin(#[from] std::io::Error),
    #[error("gave up reconnecting to the event stream")]
    ReconnectFailed,
}

#[derive(Parser, Debug)]
#[command(name = "bluff", about = "Bluff trivia game client")]
struct Cli {
    /// REST base address.
    #[arg(long, env = "BLUFF_API_URL")]
    api_url: Option<String>,

    /// Websocket base address.
    #[arg(long, env = "BLUFF_WS_URL")]
    ws_url: Option<String>,

    /// Session file; defaults to the platform data directory.
    #[arg(long, env = "BLUFF_STORE")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    User(UserCommand),
    Room(RoomCommand),
    Question(QuestionCommand),
    Game(GameCommand),
    /// Stream room events. Stdin lines `ACTION [JSON]` are sent upstream.
    Listen,
    /// Print the screen the stored state maps to.
    View,
}

#[derive(Args, Debug)]
struct UserCommand {
    #[command(subcommand)]
    command: UserSubcommand,
}

#[derive(Subcommand, Debug)]
enum UserSubcommand {
    Create {
        name: String,
    },
    Show,
    Update {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        avatar_url: Option<String>,
    },
    Logout,
}

#[derive(Args, Debug)]
struct RoomCommand {
    #[command(subcommand)]
    command: RoomSubcommand,
}

#[derive(Subcommand, Debug)]
enum RoomSubcommand {
    Create {
        #[arg(long, value_parser = parse_max_players)]
        max_players: Option<u32>,
        #[command(flatten)]
        settings: RoomSettings,
    },
    Join {
        room_id: String,
    },
    Leave,
    Show {
        #[arg(long, default_value_t = false)]
        refresh: bool,
    },
    Config(RoomSettings),
    List {
        /// Re-list every few seconds until interrupted.
        #[arg(long, default_value_t = false)]
        watch: bool,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
}

#[derive(Args, Debug)]
struct RoomSettings {
    #[arg(long, value_parser = parse_question_count)]
    questions: Option<u32>,
    #[arg(long, value_parser = parse_time_secs)]
    answer_time: Option<u32>,
    #[arg(long, value_parser = parse_time_secs)]
    guess_time: Option<u32>,
    #[arg(long)]
    points: Option<u32>,
    #[arg(long, value_parser = parse_topic)]
    topic: Option<String>,
}

impl RoomSettings {
    fn into_patch(self) -> RoomConfigPatch {
        RoomConfigPatch {
            question_count: self.questions,
            answer_time_secs: self.answer_time,
            guess_time_secs: self.guess_time,
            points_per_guess: self.points,
            topic: self.topic,
        }
    }
}

#[derive(Args, Debug)]
struct QuestionCommand {
    #[command(subcommand)]
    command: QuestionSubcommand,
}

#[derive(Subcommand, Debug)]
enum QuestionSubcommand {
    Create {
        #[arg(long)]
        text: String,
        #[arg(long = "option", required = true)]
        options: Vec<String>,
        #[arg(long, default_value = config::DEFAULT_TOPIC)]
        topic: String,
    },
    List {
        #[arg(long)]
        topic: Option<String>,
        #[arg(long, default_value_t = QUESTION_PAGE_SIZE)]
        limit: u32,
        #[arg(long)]
        last_key: Option<String>,
    },
    Topics,
    Delete {
        question_id: String,
    },
}

#[derive(Args, Debug)]
struct GameCommand {
    #[command(subcommand)]
    command: GameSubcommand,
}

#[derive(Subcommand, Debug)]
enum GameSubcommand {
    Start,
    Round,
    Answer {
        answer: String,
    },
    FinishAnswers,
    Guess {
        /// `PLAYER_ID=ANSWER` pairs.
        #[arg(required = true, value_parser = parse_guess)]
        guesses: Vec<(String, String)>,
    },
    FinishGuesses,
    Finish,
    State,
    Ranking,
    Clear,
}

struct CliContext {
    config: ClientConfig,
    api: GameApi,
    store: SessionStore,
}

impl CliContext {
    fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let mut config = ClientConfig::from_env();
        if let Some(url) = &cli.api_url {
            config.gateway.base_url.clone_from(url);
        }
        if let Some(url) = &cli.ws_url {
            config.events.ws_url.clone_from(url);
        }
        let api = GameApi::new(Gateway::new(config.gateway.clone())?);
        let store = match &cli.store {
            Some(path) => SessionStore::new(FileStorage::new(path)),
            None => SessionStore::open_default()?,
        };
        Ok(Self { config, api, store })
    }

    fn user_id(&self) -> Result<String, CliError> {
        self.store
            .user()
            .map(|user| user.user_id)
            .ok_or(CliError::NotSignedIn)
    }

    fn room_id(&self) -> Result<String, CliError> {
        self.store
            .room()
            .map(|room| room.room_id)
            .ok_or(CliError::NoRoom)
    }

    fn session_id(&self) -> Result<String, CliError> {
        self.store.session_id().ok_or(CliError::NoSession)
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let ctx = CliContext::from_cli(&cli)?;

    match cli.command {
        Command::User(user) => run_user(&ctx, user).await,
        Command::Room(room) => run_room(&ctx, room).await,
        Command::Question(question) => run_question(&ctx, question).await,
        Command::Game(game) => run_game(&ctx, game).await,
        Command::Listen => run_listen(&ctx).await,
        Command::View => run_view(&ctx).await,
    }
}

// =============================================================================
// USER / ROOM / QUESTION
// =============================================================================

async fn run_user(ctx: &CliContext, user: UserCommand) -> Result<(), CliError> {
    let mut state = UserState::restore(&ctx.store);
    match user.command {
        UserSubcommand::Create { name } => {
            let user = state.create_user(&ctx.api, &ctx.store, &name).await?;
            print_json(user)
        }
        UserSubcommand::Show => print_json(state.user.as_ref().ok_or(CliError::NotSignedIn)?),
        UserSubcommand::Update { name, avatar_url } => {
            let update = UserUpdate { name, avatar_url };
            let user = state.update_user(&ctx.api, &ctx.store, &update).await?;
            print_json(user)
        }
        UserSubcommand::Logout => {
            state.logout(&ctx.store);
            eprintln!("signed out");
            Ok(())
        }
    }
}

async fn run_room(ctx: &CliContext, room: RoomCommand) -> Result<(), CliError> {
    let mut state = RoomState::restore(&ctx.store);
    match room.command {
        RoomSubcommand::Create {
            max_players,
            settings,
        } => {
            let user_id = ctx.user_id()?;
            let options = RoomOptions {
                max_players,
                config: settings.into_patch(),
            };
            let room = state
                .create_room(&ctx.api, &ctx.store, &user_id, &options)
                .await?;
            print_json(room)
        }
        RoomSubcommand::Join { room_id } => {
            let user_id = ctx.user_id()?;
            let room = state
                .join_room(&ctx.api, &ctx.store, &room_id, &user_id)
                .await?;
            print_json(room)
        }
        RoomSubcommand::Leave => {
            let user_id = ctx.user_id()?;
            let room_id = ctx.room_id()?;
            state
                .leave_room(&ctx.api, &ctx.store, &room_id, &user_id)
                .await?;
            eprintln!("left room {room_id}");
            Ok(())
        }
        RoomSubcommand::Show { refresh } => {
            let room_id = ctx.room_id()?;
            if refresh {
                state.refresh(&ctx.api, &ctx.store, &room_id).await?;
            }
            print_json(state.room.as_ref().ok_or(CliError::NoRoom)?)?;
            if let Ok(user_id) = ctx.user_id() {
                eprintln!(
                    "host: {}  can start: {}",
                    state.is_host(&user_id),
                    state.can_start()
                );
            }
            Ok(())
        }
        RoomSubcommand::Config(settings) => {
            let user_id = ctx.user_id()?;
            let room_id = ctx.room_id()?;
            let room = state
                .update_config(&ctx.api, &ctx.store, &room_id, &user_id, &settings.into_patch())
                .await?;
            print_json(room)
        }
        RoomSubcommand::List { watch, pages } => run_room_list(ctx, watch, pages).await,
    }
}

async fn run_room_list(ctx: &CliContext, watch: bool, pages: u32) -> Result<(), CliError> {
    let mut list = RoomListState::default();
    load_rooms(ctx, &mut list, pages).await?;
    print_rooms(&list.rooms);
    if !watch {
        return Ok(());
    }

    let mut ticker = tokio::time::interval(AUTO_REFRESH_INTERVAL);
    ticker.tick().await;
    let mut failure = None;
    while list.should_auto_refresh() {
        tokio::select! {
            _ = ticker.tick() => {
                match load_rooms(ctx, &mut list, pages).await {
                    Ok(()) => {
                        println!();
                        print_rooms(&list.rooms);
                    }
                    Err(e) => {
                        warn!(error = %e, "cli: room refresh failed, watch stopped");
                        failure = Some(e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
    failure.map_or(Ok(()), Err)
}

async fn load_rooms(
    ctx: &CliContext,
    list: &mut RoomListState,
    pages: u32,
) -> Result<(), CliError> {
    list.refresh(&ctx.api).await?;
    for _ in 1..pages {
        if !list.has_more() {
            break;
        }
        list.load_more(&ctx.api).await?;
    }
    Ok(())
}

async fn run_question(ctx: &CliContext, question: QuestionCommand) -> Result<(), CliError> {
    match question.command {
        QuestionSubcommand::Create {
            text,
            options,
            topic,
        } => {
            let question = NewQuestion {
                text,
                options,
                topic,
            };
            let created = ctx.api.create_question(&question).await?;
            print_json(&created.question)
        }
        QuestionSubcommand::List {
            topic,
            limit,
            last_key,
        } => {
            let page = match topic {
                Some(topic) => ctx.api.list_questions_by_topic(&topic, limit).await?,
                None => ctx.api.list_questions(limit, last_key.as_deref()).await?,
            };
            print_json(&page.questions)?;
            if let Some(key) = page.last_key {
                eprintln!("more available: --last-key {key}");
            }
            Ok(())
        }
        QuestionSubcommand::Topics => {
            for topic in ctx.api.list_topics().await?.topics {
                println!("{topic}");
            }
            Ok(())
        }
        QuestionSubcommand::Delete { question_id } => {
            let ack = ctx.api.delete_question(&question_id).await?;
            eprintln!("{}", ack.message);
            Ok(())
        }
    }
}

// =============================================================================
// GAME
// =============================================================================

async fn run_game(ctx: &CliContext, game: GameCommand) -> Result<(), CliError> {
    let mut state = GameState::default();
    match game.command {
        GameSubcommand::Start => {
            let user_id = ctx.user_id()?;
            let room_id = ctx.room_id()?;
            let session_id = state
                .start_game(&ctx.api, &ctx.store, &room_id, &user_id)
                .await?;
            println!("{session_id}");
            Ok(())
        }
        GameSubcommand::Round => {
            let session_id = ctx.session_id()?;
            let round = state.start_round(&ctx.api, &session_id).await?;
            println!("round {round}");
            if let Some(question) = &state.current_question {
                print_json(question)?;
            }
            Ok(())
        }
        GameSubcommand::Answer { answer } => {
            let session_id = ctx.session_id()?;
            let user_id = ctx.user_id()?;
            state
                .submit_answer(&ctx.api, &session_id, &user_id, &answer)
                .await?;
            eprintln!("answer sent");
            Ok(())
        }
        GameSubcommand::FinishAnswers => {
            let session_id = ctx.session_id()?;
            state.finish_answer_phase(&ctx.api, &session_id).await?;
            eprintln!("answer phase closed");
            Ok(())
        }
        GameSubcommand::Guess { guesses } => {
            let session_id = ctx.session_id()?;
            let user_id = ctx.user_id()?;
            let guesses: HashMap<String, String> = guesses.into_iter().collect();
            state
                .submit_guesses(&ctx.api, &session_id, &user_id, &guesses)
                .await?;
            eprintln!("{} guesses sent", guesses.len());
            Ok(())
        }
        GameSubcommand::FinishGuesses => {
            let session_id = ctx.session_id()?;
            let results = state.finish_guess_phase(&ctx.api, &session_id).await?;
            print_json(results)?;
            print_ranking(&state.ranking);
            Ok(())
        }
        GameSubcommand::Finish => {
            let session_id = ctx.session_id()?;
            let winner = state.finish_game(&ctx.api, &session_id).await?;
            println!("winner: {} ({} pts)", winner.name, winner.score);
            print_ranking(&state.ranking);
            Ok(())
        }
        GameSubcommand::State => {
            let session_id = ctx.session_id()?;
            state.refresh(&ctx.api, &session_id).await?;
            print_json(&state.session)?;
            let phase = state.phase().map_or("none", Phase::as_str);
            eprintln!(
                "phase: {phase}  round {}/{}  finished: {}",
                state.current_round(),
                state.total_rounds(),
                state.is_finished()
            );
            print_ranking(&state.ranking);
            Ok(())
        }
        GameSubcommand::Ranking => {
            let session_id = ctx.session_id()?;
            let ranking = ctx.api.game_ranking(&session_id).await?;
            print_ranking(&ranking.ranking);
            Ok(())
        }
        GameSubcommand::Clear => {
            state.clear(&ctx.store);
            eprintln!("game session cleared");
            Ok(())
        }
    }
}

async fn run_view(ctx: &CliContext) -> Result<(), CliError> {
    let user = UserState::restore(&ctx.store);
    let room = RoomState::restore(&ctx.store);
    let game = GameState::restore(&ctx.api, &ctx.store).await;
    println!("{}", View::resolve(&user, &room, &game).as_str());
    Ok(())
}

// =============================================================================
// LISTEN
// =============================================================================

async fn run_listen(ctx: &CliContext) -> Result<(), CliError> {
    let user_id = ctx.user_id()?;
    let room_id = ctx.room_id()?;
    let user = UserState::restore(&ctx.store);
    let mut room = RoomState::restore(&ctx.store);
    let mut game = GameState::restore(&ctx.api, &ctx.store).await;

    let client = EventClient::new(ctx.config.events.clone(), &room_id, &user_id);
    let (tx, mut events) = mpsc::unbounded_channel::<(String, Value)>();
    let local = [
        envelope::CONNECTED,
        envelope::DISCONNECTED,
        envelope::ERROR,
        envelope::RECONNECT_FAILED,
    ];
    for name in local.into_iter().chain(ServerEvent::names()) {
        let tx = tx.clone();
        client.on(name, move |data| {
            let _ = tx.send((name.to_owned(), data.clone()));
        });
    }
    drop(tx);

    client.connect().await?;
    let mut view = View::resolve(&user, &room, &game);
    println!("view {}", view.as_str());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            received = events.recv() => {
                let Some((name, data)) = received else {
                    return Ok(());
                };
                println!("{name} {data}");
                if name == envelope::RECONNECT_FAILED {
                    return Err(CliError::ReconnectFailed);
                }
                let event = ServerEvent::classify(&name, &data);
                match sync::apply_event(&event, &ctx.api, &ctx.store, &mut room, &mut game).await {
                    Ok(Applied::Nothing) => {}
                    Ok(_) => {
                        let next = View::resolve(&user, &room, &game);
                        if next != view {
                            view = next;
                            println!("view {}", view.as_str());
                        }
                    }
                    Err(e) => warn!(event = %name, error = %e, "cli: refresh after event failed"),
                }
            }
            line = stdin.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if let Some((action, data)) = action_from_line(&line) {
                        if let Err(e) = client.send(&action, &data) {
                            warn!(action = %action, error = %e, "cli: action not sent");
                        }
                    }
                }
                None => stdin_open = false,
            },
            _ = tokio::signal::ctrl_c() => {
                client.disconnect();
                info!(room_id = %room_id, "cli: stopped listening");
                return Ok(());
            }
        }
    }
}

// =============================================================================
// PARSING / OUTPUT
// =============================================================================

fn parse_max_players(value: &str) -> Result<u32, String> {
    let n: u32 = value.parse().map_err(|_| format!("`{value}` is not a number"))?;
    let min = u32::try_from(config::MIN_PLAYERS).unwrap_or(u32::MAX);
    if (min..=config::MAX_PLAYERS).contains(&n) {
        Ok(n)
    } else {
        Err(format!("must be between {min} and {}", config::MAX_PLAYERS))
    }
}

fn parse_question_count(value: &str) -> Result<u32, String> {
    let n: u32 = value.parse().map_err(|_| format!("`{value}` is not a number"))?;
    if config::QUESTION_OPTIONS.contains(&n) {
        Ok(n)
    } else {
        Err(format!("must be one of {:?}", config::QUESTION_OPTIONS))
    }
}

fn parse_time_secs(value: &str) -> Result<u32, String> {
    let n: u32 = value.parse().map_err(|_| format!("`{value}` is not a number"))?;
    if (config::MIN_TIME_SECS..=config::MAX_TIME_SECS).contains(&n) {
        Ok(n)
    } else {
        Err(format!(
            "must be between {} and {} seconds",
            config::MIN_TIME_SECS,
            config::MAX_TIME_SECS
        ))
    }
}

fn parse_topic(value: &str) -> Result<String, String> {
    if config::AVAILABLE_TOPICS.contains(&value) {
        Ok(value.to_owned())
    } else {
        Err(format!("must be one of {}", config::AVAILABLE_TOPICS.join(", ")))
    }
}

fn parse_guess(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((player, answer)) if !player.trim().is_empty() && !answer.trim().is_empty() => {
            Ok((player.trim().to_owned(), answer.trim().to_owned()))
        }
        _ => Err(format!("`{value}` is not PLAYER_ID=ANSWER")),
    }
}

/// `ACTION` or `ACTION {json}`; blank lines are skipped.
fn parse_action_line(line: &str) -> Result<Option<(String, Value)>, CliError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let (action, rest) = trimmed
        .split_once(char::is_whitespace)
        .unwrap_or((trimmed, ""));
    let rest = rest.trim();
    let data = if rest.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(rest)?
    };
    Ok(Some((action.to_owned(), data)))
}

/// Like [`parse_action_line`], but a malformed line is logged and skipped so
/// one typo does not end a `listen` session.
fn action_from_line(line: &str) -> Option<(String, Value)> {
    match parse_action_line(line) {
        Ok(action) => action,
        Err(e) => {
            warn!(error = %e, "cli: ignoring malformed action line");
            None
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

fn print_rooms(rooms: &[Room]) {
    if rooms.is_empty() {
        println!("no rooms available");
    }
    for room in rooms {
        println!(
            "{}\t{}/{}\t{:?}\t{}",
            room.room_id,
            room.players.len(),
            room.max_players,
            room.status,
            room.config.topic
        );
    }
}

fn print_ranking(ranking: &[RankingEntry]) {
    for entry in ranking {
        println!("{:>2}. {}\t{}", entry.position, entry.name, entry.score);
    }
}
