use std::io::{self, BufRead, IsTerminal, Write};

use auth::user::{EMAIL_MAX_LENGTH, FULL_NAME_MAX_LENGTH, SHORT_NAME_MAX_LENGTH};
use auth::{AuthError, ExtraFields, PasswordValidators, User, UserManager};
use clap::Args;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use validator::ValidateEmail;

use crate::config::{Settings, initialize_app_state};

pub const SUCCESS_MESSAGE: &str = "Superuser created successfully.";

#[derive(Args, Debug, Clone, Default)]
pub struct CreateSuperuserArgs {
    /// Database URL, overriding the configured one
    #[arg(short, long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Email address of the new superuser
    #[arg(long)]
    pub email: Option<String>,

    #[arg(long)]
    pub full_name: Option<String>,

    #[arg(long)]
    pub short_name: Option<String>,

    /// Do not prompt for anything. Requires --email.
    #[arg(long)]
    pub no_input: bool,

    #[arg(
        long,
        env = "IMPROVED_USER_SUPERUSER_PASSWORD",
        hide = true,
        hide_env_values = true
    )]
    pub password: Option<String>,
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("You must use --email with --no-input.")]
    EmailRequired,

    /// Every message about one field, joined with `; `.
    #[error("{0}")]
    InvalidField(String),

    #[error("Error: That email address is already taken.")]
    EmailTaken,

    #[error(
        "Superuser creation skipped due to not running in a TTY. \
         Run `improved-user create-superuser` in a terminal, or pass --no-input."
    )]
    NotATty,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Where interactive answers come from.
pub trait Prompt {
    fn read_line(&mut self, label: &str) -> io::Result<String>;

    fn read_password(&mut self, label: &str) -> io::Result<String> {
        self.read_line(label)
    }
}

/// Prompts on stdout and reads answers from stdin.
#[derive(Debug, Default)]
pub struct StdioPrompt;

impl Prompt for StdioPrompt {
    fn read_line(&mut self, label: &str) -> io::Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", label)?;
        stdout.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

fn max_length_message(max: u64, length: u64) -> String {
    format!(
        "Ensure this value has at most {} characters (it has {}).",
        max, length
    )
}

/// Check and normalize an email address, then make sure nobody has it yet.
async fn clean_email(manager: &UserManager, raw: &str) -> Result<String, CommandError> {
    let email = raw.trim();
    let mut messages = Vec::new();
    if email.is_empty() {
        messages.push("This field cannot be blank.".to_string());
    } else {
        if !email.validate_email() {
            messages.push("Enter a valid email address.".to_string());
        }
        let length = email.chars().count() as u64;
        if length > EMAIL_MAX_LENGTH {
            messages.push(max_length_message(EMAIL_MAX_LENGTH, length));
        }
    }
    if !messages.is_empty() {
        return Err(CommandError::InvalidField(messages.join("; ")));
    }

    let email = UserManager::normalize_email(email);
    if manager.email_exists(&email, None).await? {
        return Err(CommandError::EmailTaken);
    }
    Ok(email)
}

fn clean_name(raw: &str, max: u64) -> Result<String, CommandError> {
    let name = raw.trim();
    let length = name.chars().count() as u64;
    if length > max {
        return Err(CommandError::InvalidField(max_length_message(max, length)));
    }
    Ok(name.to_string())
}

fn is_field_error(err: &CommandError) -> bool {
    matches!(err, CommandError::InvalidField(_) | CommandError::EmailTaken)
}

fn report<W: Write>(out: &mut W, err: &CommandError) -> io::Result<()> {
    match err {
        CommandError::InvalidField(messages) => writeln!(out, "Error: {}", messages),
        other => writeln!(out, "{}", other),
    }
}

async fn prompt_email<P: Prompt, W: Write>(
    manager: &UserManager,
    given: Option<&str>,
    prompt: &mut P,
    out: &mut W,
) -> Result<String, CommandError> {
    let mut candidate = given.map(str::to_string);
    loop {
        let raw = match candidate.take() {
            Some(raw) => raw,
            None => prompt.read_line("Email address: ")?,
        };
        match clean_email(manager, &raw).await {
            Ok(email) => return Ok(email),
            Err(e) if is_field_error(&e) => report(out, &e)?,
            Err(e) => return Err(e),
        }
    }
}

fn prompt_name<P: Prompt, W: Write>(
    label: &str,
    max: u64,
    given: Option<&str>,
    prompt: &mut P,
    out: &mut W,
) -> Result<String, CommandError> {
    let mut candidate = given.map(str::to_string);
    loop {
        let raw = match candidate.take() {
            Some(raw) => raw,
            None => prompt.read_line(label)?,
        };
        match clean_name(&raw, max) {
            Ok(name) => return Ok(name),
            Err(e) => report(out, &e)?,
        }
    }
}

fn prompt_password<P: Prompt, W: Write>(
    validators: &PasswordValidators,
    user: &User,
    prompt: &mut P,
    out: &mut W,
) -> Result<String, CommandError> {
    loop {
        let password = prompt.read_password("Password: ")?;
        let again = prompt.read_password("Password (again): ")?;
        if password != again {
            writeln!(out, "Error: Your passwords didn't match.")?;
            continue;
        }
        if password.trim().is_empty() {
            writeln!(out, "Error: Blank passwords aren't allowed.")?;
            continue;
        }
        if let Err(issues) = validators.validate(&password, Some(user)) {
            for issue in &issues {
                writeln!(out, "{}", issue.message)?;
            }
            let answer =
                prompt.read_line("Bypass password validation and create user anyway? [y/N]: ")?;
            if !answer.trim().eq_ignore_ascii_case("y") {
                continue;
            }
        }
        return Ok(password);
    }
}

/// Gather the new superuser's details from `args` and, unless
/// `args.no_input` is set, from `prompt`; then create the account.
pub async fn run_create_superuser<P: Prompt, W: Write>(
    manager: &UserManager,
    validators: &PasswordValidators,
    args: &CreateSuperuserArgs,
    prompt: &mut P,
    out: &mut W,
) -> Result<User, CommandError> {
    trace!("Entering run_create_superuser function");

    let (email, full_name, short_name, password) = if args.no_input {
        let email = args.email.as_deref().ok_or(CommandError::EmailRequired)?;
        let email = clean_email(manager, email).await?;
        let full_name = clean_name(args.full_name.as_deref().unwrap_or_default(), FULL_NAME_MAX_LENGTH)?;
        let short_name = clean_name(args.short_name.as_deref().unwrap_or_default(), SHORT_NAME_MAX_LENGTH)?;
        if args.password.is_none() {
            debug!("No password given; the superuser gets an unusable password");
        }
        (email, full_name, short_name, args.password.clone())
    } else {
        let email = prompt_email(manager, args.email.as_deref(), prompt, out).await?;
        let full_name = prompt_name(
            "Full name: ",
            FULL_NAME_MAX_LENGTH,
            args.full_name.as_deref(),
            prompt,
            out,
        )?;
        let short_name = prompt_name(
            "Short name: ",
            SHORT_NAME_MAX_LENGTH,
            args.short_name.as_deref(),
            prompt,
            out,
        )?;

        let mut candidate = User::new(email.clone());
        candidate.names.full_name = full_name.clone();
        candidate.names.short_name = short_name.clone();
        let password = prompt_password(validators, &candidate, prompt, out)?;
        (email, full_name, short_name, Some(password))
    };

    let extra = ExtraFields::new().full_name(full_name).short_name(short_name);
    let user = manager
        .create_superuser(&email, password.as_deref(), extra)
        .await?;

    info!("Superuser {} created (id: {:?})", user.email(), user.id);
    writeln!(out, "{}", SUCCESS_MESSAGE)?;
    Ok(user)
}

pub async fn create_superuser(args: CreateSuperuserArgs) -> anyhow::Result<()> {
    trace!("Entering create_superuser function");

    if !args.no_input && !io::stdin().is_terminal() {
        warn!("Refusing to prompt without a terminal");
        return Err(CommandError::NotATty.into());
    }

    let mut settings = Settings::load()?;
    if let Some(database_url) = &args.database_url {
        settings.database_url = database_url.clone();
    }
    let state = initialize_app_state(settings).await?;

    run_create_superuser(
        &state.manager,
        &state.validators,
        &args,
        &mut StdioPrompt,
        &mut io::stdout(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_utils::setup_test_app_state;
    use std::collections::VecDeque;

    /// Answers prompts from a script and remembers what was asked.
    #[derive(Default)]
    struct ScriptedPrompt {
        answers: VecDeque<String>,
        asked: Vec<String>,
    }

    impl ScriptedPrompt {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|a| a.to_string()).collect(),
                asked: Vec::new(),
            }
        }
    }

    impl Prompt for ScriptedPrompt {
        fn read_line(&mut self, label: &str) -> io::Result<String> {
            self.asked.push(label.to_string());
            self.answers
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
        }
    }

    fn no_input(email: Option<&str>) -> CreateSuperuserArgs {
        CreateSuperuserArgs {
            email: email.map(str::to_string),
            no_input: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_no_input_without_password_gets_unusable_password() {
        let state = setup_test_app_state().await;
        let mut out = Vec::new();

        let user = run_create_superuser(
            &state.manager,
            &state.validators,
            &no_input(Some("root@EXAMPLE.com")),
            &mut ScriptedPrompt::default(),
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(user.email(), "root@example.com");
        assert!(user.is_staff());
        assert!(user.is_superuser());
        assert!(!user.has_usable_password());
        assert_eq!(String::from_utf8(out).unwrap(), "Superuser created successfully.\n");
    }

    #[tokio::test]
    async fn test_no_input_with_password() {
        let state = setup_test_app_state().await;
        let args = CreateSuperuserArgs {
            password: Some("correct horse battery".to_string()),
            full_name: Some("Root User".to_string()),
            ..no_input(Some("root@example.com"))
        };

        let mut user = run_create_superuser(
            &state.manager,
            &state.validators,
            &args,
            &mut ScriptedPrompt::default(),
            &mut Vec::new(),
        )
        .await
        .unwrap();

        assert_eq!(user.get_full_name(), "Root User");
        assert!(state.manager.check_password(&mut user, "correct horse battery").await.unwrap());
    }

    #[tokio::test]
    async fn test_no_input_requires_email() {
        let state = setup_test_app_state().await;
        let err = run_create_superuser(
            &state.manager,
            &state.validators,
            &no_input(None),
            &mut ScriptedPrompt::default(),
            &mut Vec::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "You must use --email with --no-input.");
    }

    #[tokio::test]
    async fn test_no_input_rejects_invalid_email() {
        let state = setup_test_app_state().await;
        let long_invalid = format!("{}@", "a".repeat(260));
        let err = run_create_superuser(
            &state.manager,
            &state.validators,
            &no_input(Some(&long_invalid)),
            &mut ScriptedPrompt::default(),
            &mut Vec::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Enter a valid email address.; Ensure this value has at most 254 characters (it has 261)."
        );
        assert!(state.manager.search(None).await.unwrap().iter().all(|u| u.email() != long_invalid));
    }

    #[tokio::test]
    async fn test_no_input_rejects_taken_email() {
        let state = setup_test_app_state().await;
        state
            .manager
            .create_user("taken@example.com", None, ExtraFields::new())
            .await
            .unwrap();

        let err = run_create_superuser(
            &state.manager,
            &state.validators,
            &no_input(Some("taken@EXAMPLE.COM")),
            &mut ScriptedPrompt::default(),
            &mut Vec::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "Error: That email address is already taken.");
    }

    #[tokio::test]
    async fn test_interactive_reprompts_until_valid() {
        let state = setup_test_app_state().await;
        let mut prompt = ScriptedPrompt::new(&[
            "not-an-email",
            "boss@example.com",
            "The Boss",
            "Boss",
            "x9!kQz#2mLp",
            "different",
            "",
            "",
            "x9!kQz#2mLp",
            "x9!kQz#2mLp",
        ]);
        let mut out = Vec::new();

        let mut user = run_create_superuser(
            &state.manager,
            &state.validators,
            &CreateSuperuserArgs::default(),
            &mut prompt,
            &mut out,
        )
        .await
        .unwrap();

        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("Error: Enter a valid email address."));
        assert!(output.contains("Error: Your passwords didn't match."));
        assert!(output.contains("Error: Blank passwords aren't allowed."));
        assert!(output.ends_with("Superuser created successfully.\n"));
        assert_eq!(prompt.asked[0], "Email address: ");
        assert_eq!(user.get_short_name(), "Boss");
        assert!(state.manager.check_password(&mut user, "x9!kQz#2mLp").await.unwrap());
    }

    #[tokio::test]
    async fn test_interactive_weak_password_needs_confirmation() {
        let state = setup_test_app_state().await;
        let args = CreateSuperuserArgs {
            email: Some("weak@example.com".to_string()),
            full_name: Some(String::new()),
            short_name: Some(String::new()),
            ..Default::default()
        };
        let mut prompt = ScriptedPrompt::new(&["1234", "1234", "n", "1234", "1234", "y"]);
        let mut out = Vec::new();

        let mut user = run_create_superuser(
            &state.manager,
            &state.validators,
            &args,
            &mut prompt,
            &mut out,
        )
        .await
        .unwrap();

        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("This password is too short. It must contain at least 8 characters."));
        assert!(output.contains("This password is entirely numeric."));
        assert_eq!(
            prompt
                .asked
                .iter()
                .filter(|label| label.starts_with("Bypass password validation"))
                .count(),
            2
        );
        assert!(state.manager.check_password(&mut user, "1234").await.unwrap());
    }
}
