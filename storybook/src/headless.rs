//! Headless mode for the storybook reader.
//!
//! This module provides a simple text-based interface for reading stories
//! without a graphical front end. It's designed for scripting and testing
//! against a live backend.

use storybook_core::{
    AgeGroup, ArtStyle, ExportFormat, Genre, Illustration, NavDirection, PageView, ReaderMode,
    SessionError, StoryController, StoryRequest, StorybookConfig,
};
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::info;

/// Options gathered from the command line.
#[derive(Debug, Clone)]
pub struct HeadlessOptions {
    pub config: StorybookConfig,
    pub age_group: AgeGroup,
    pub genre: Genre,
    pub art_style: ArtStyle,
    pub num_scenes: u8,
    /// Create a story with this prompt on startup.
    pub prompt: Option<String>,
}

impl HeadlessOptions {
    fn request(&self, prompt: &str) -> StoryRequest {
        StoryRequest::new(prompt)
            .with_age_group(self.age_group)
            .with_genre(self.genre)
            .with_art_style(self.art_style)
            .with_scenes(self.num_scenes)
    }
}

enum Flow {
    Continue,
    Quit,
}

/// What was last printed, so background results only print what changed.
#[derive(Default)]
struct Shown {
    page: Option<usize>,
    pages: usize,
    illustration: Option<Illustration>,
    choices: Vec<String>,
}

/// Run the reader in headless mode.
///
/// This provides a simple line-oriented protocol:
/// - Lines starting with `#` are commands (see `#help`)
/// - A bare number picks a choice while reading
/// - Any other line in setup is used as a story prompt
/// - Output lines are tagged (`[PAGE]`, `[CHOICES]`, `[ERROR]`, ...)
pub async fn run_headless(options: HeadlessOptions) -> Result<(), SessionError> {
    let mut controller = StoryController::from_config(&options.config)?;
    info!(
        api_url = %options.config.api_url,
        saved = controller.saved_stories().len(),
        "headless reader started"
    );

    println!("=== Storybook Headless Mode ===");
    println!("Backend: {}", options.config.api_url);
    println!(
        "Setup: ages {}, {}, {} illustrations, {} scenes",
        options.age_group, options.genre, options.art_style, options.num_scenes
    );
    println!();
    print_help();
    println!();

    if let Some(prompt) = options.prompt.clone() {
        create_story(&mut controller, &options, &prompt).await;
    }

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut shown = Shown::default();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        eprintln!("Error reading input: {e}");
                        break;
                    }
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Flow::Quit = handle_line(&mut controller, &options, line).await {
                    break;
                }
            }
            _ = controller.run_once() => {}
        }
        report_changes(&mut controller, &mut shown);
    }

    if controller.autosave() {
        println!("[SAVED] Story saved on exit");
    }
    println!("Goodbye!");
    Ok(())
}

async fn handle_line(controller: &mut StoryController, options: &HeadlessOptions, line: &str) -> Flow {
    let Some(command) = line.strip_prefix('#') else {
        match (controller.mode(), line.parse::<usize>()) {
            (ReaderMode::Reading, Ok(n)) => choose(controller, n),
            (ReaderMode::Setup, _) => create_story(controller, options, line).await,
            _ => println!("[ERROR] Unknown input. Type #help for help."),
        }
        return Flow::Continue;
    };

    let (name, rest) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name {
        "quit" | "exit" => return Flow::Quit,
        "new" => {
            if rest.is_empty() {
                println!("[ERROR] Usage: #new <prompt>");
            } else {
                create_story(controller, options, rest).await;
            }
        }
        "refine" => match rest.split_once(char::is_whitespace) {
            Some((character, text)) => match controller.refine_character(character, text).await {
                Ok(true) => println!("[CHARACTER] {character} refined"),
                Ok(false) => println!("[ERROR] Nothing to add"),
                Err(e) => println!("[ERROR] {}", e.user_message()),
            },
            None => println!("[ERROR] Usage: #refine <name> <description>"),
        },
        "read" => {
            if let Err(e) = controller.begin_reading() {
                println!("[ERROR] {}", e.user_message());
            }
        }
        "next" => turn(controller.handle_gesture(NavDirection::Next)),
        "prev" | "previous" => turn(controller.handle_gesture(NavDirection::Previous)),
        "goto" => match rest.parse::<usize>() {
            Ok(page) if page > 0 => turn(controller.go_to(page - 1)),
            _ => println!("[ERROR] Usage: #goto <page>"),
        },
        "restart" => turn(controller.restart()),
        "choose" => match rest.parse::<usize>() {
            Ok(n) => choose(controller, n),
            Err(_) => println!("[ERROR] Usage: #choose <number>"),
        },
        "image" => {
            let page = controller.current_page();
            if controller.regenerate_image_with_prompt(page, rest) {
                println!("[GENERATING] New illustration for page {}", page + 1);
            } else {
                println!("[ERROR] No page to illustrate");
            }
        }
        "regen" => match controller.regenerate_all_images().await {
            Ok(updated) => println!("[IMAGES] {updated} illustrations replaced"),
            Err(e) => println!("[ERROR] {}", e.user_message()),
        },
        "save" => {
            if controller.save() {
                println!("[SAVED] Story saved");
            } else {
                println!("[ERROR] Nothing saved");
            }
        }
        "list" => {
            let saved = controller.saved_stories();
            if saved.is_empty() {
                println!("[SAVED] No saved stories");
            }
            for snapshot in saved {
                println!(
                    "[SAVED] {}  {} ({} pages)",
                    snapshot.id(),
                    snapshot.story.title,
                    snapshot.story.page_count()
                );
            }
        }
        "load" => match controller.load_saved(rest) {
            Ok(_) => println!("[LOADED] {rest}"),
            Err(e) => println!("[ERROR] {}", e.user_message()),
        },
        "delete" => {
            if controller.delete_saved(rest) {
                println!("[DELETED] {rest}");
            } else {
                println!("[ERROR] Could not delete {rest}");
            }
        }
        "export" => match ExportFormat::parse(rest) {
            Some(format) => match controller.export(format).await {
                Ok(file) => println!("[EXPORTED] {} ({})", file.filename, file.file),
                Err(e) => println!("[ERROR] {}", e.user_message()),
            },
            None => println!("[ERROR] Usage: #export <pdf|html|json>"),
        },
        "wait" => controller.settle().await,
        "status" => print_status(controller),
        "help" => print_help(),
        _ => println!("[ERROR] Unknown command. Type #help for help."),
    }
    Flow::Continue
}

async fn create_story(controller: &mut StoryController, options: &HeadlessOptions, prompt: &str) {
    println!("[GENERATING] Writing your story...");
    match controller.create_story(options.request(prompt)).await {
        Ok(story) => {
            println!("[STORY] {} ({} scenes planned)", story.title, story.total_planned_scenes);
            for character in &story.characters {
                println!(
                    "[CHARACTER] {} ({}): {}",
                    character.name, character.role, character.visual_description
                );
            }
            println!("Refine characters with #refine <name> <text>, then #read to begin.");
        }
        Err(e) => println!("[ERROR] {}", e.user_message()),
    }
    // Already printed above.
    controller.take_error();
}

fn choose(controller: &mut StoryController, n: usize) {
    if n > 0 && controller.select_choice(n - 1) {
        println!("[GENERATING] Writing the next scene...");
    } else {
        println!("[ERROR] No such choice, or a scene is already being written");
    }
}

fn turn(result: Option<usize>) {
    if result.is_none() {
        println!("[ERROR] Cannot turn to that page");
    }
}

fn report_changes(controller: &mut StoryController, shown: &mut Shown) {
    if let Some(message) = controller.take_error() {
        println!("[ERROR] {message}");
    }

    let Some(view) = controller.view() else {
        *shown = Shown::default();
        return;
    };

    if shown.page != Some(view.index) || shown.pages != view.total_pages {
        print_page(&view);
        shown.page = Some(view.index);
        shown.pages = view.total_pages;
        shown.illustration = Some(view.illustration.clone());
        shown.choices.clear();
    } else if shown.illustration.as_ref() != Some(&view.illustration) {
        print_illustration(&view.illustration);
        shown.illustration = Some(view.illustration.clone());
    }

    let choices: Vec<String> = controller
        .choices()
        .iter()
        .map(|c| format!("{} {}: {}", c.icon, c.title, c.description))
        .collect();
    if choices != shown.choices {
        if !choices.is_empty() {
            println!("[CHOICES]");
            for (i, choice) in choices.iter().enumerate() {
                println!("  {}. {choice}", i + 1);
            }
        }
        shown.choices = choices;
    }
}

fn print_page(view: &PageView) {
    println!("[PAGE] {}: {}", view.label(), view.title);
    for para in view.text.split("\n\n") {
        println!("{para}");
    }
    print_illustration(&view.illustration);
    if view.show_export {
        println!("[END] Export with #export <pdf|html|json>");
    }
    println!();
}

fn print_illustration(illustration: &Illustration) {
    match illustration {
        Illustration::Image(url) => println!("[IMAGE] {url}"),
        Illustration::Placeholder => println!("[IMAGE] (not yet painted)"),
    }
}

fn print_status(controller: &StoryController) {
    println!("[STATUS]");
    println!("  Mode: {:?}", controller.mode());
    match controller.story() {
        Some(story) => {
            println!("  Story: {} ({})", story.title, story.id);
            println!(
                "  Page: {} of {} ({} planned)",
                controller.current_page() + 1,
                story.page_count(),
                story.total_planned_scenes
            );
        }
        None => println!("  Story: none"),
    }
    println!("  Generating: {}", controller.is_generating());
    println!("  Pending requests: {}", controller.pending_tasks());
    let prefs = controller.preferences();
    println!(
        "  Preferences: ages {}, {}, {}, auto-save {}",
        prefs.age_group,
        prefs.genre,
        prefs.art_style,
        if prefs.auto_save { "on" } else { "off" }
    );
    println!("  Saved stories: {}", controller.saved_stories().len());
}

fn print_help() {
    println!("Commands:");
    println!("  #new <prompt>        - Create a story (or type the prompt directly)");
    println!("  #refine <name> <txt> - Add detail to a character's look");
    println!("  #read                - Lock characters and open the book");
    println!("  #next, #prev         - Turn the page");
    println!("  #goto <page>         - Jump to a page");
    println!("  #restart             - Back to the first page");
    println!("  #choose <n>          - Pick a choice (or type the number)");
    println!("  #image [prompt]      - Repaint the current page");
    println!("  #regen               - Repaint every page");
    println!("  #save, #list         - Save this story, list saved stories");
    println!("  #load <id>           - Open a saved story");
    println!("  #delete <id>         - Delete a saved story");
    println!("  #export <format>     - Export as pdf, html or json");
    println!("  #wait                - Wait for pending pages and pictures");
    println!("  #status              - Show session status");
    println!("  #help                - Show this help");
    println!("  #quit                - Exit");
}

/// Parse reader options from command line arguments.
pub fn parse_options_from_args(args: &[String]) -> Result<HeadlessOptions, String> {
    let mut options = HeadlessOptions {
        config: StorybookConfig::from_env(),
        age_group: AgeGroup::default(),
        genre: Genre::default(),
        art_style: ArtStyle::default(),
        num_scenes: 5,
        prompt: None,
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--api-url", Some(url)) => options.config = options.config.with_api_url(url.as_str()),
            ("--storage-dir", Some(dir)) => {
                options.config = options.config.with_storage_dir(dir.as_str())
            }
            ("--age", Some(age)) => options.age_group = age.parse()?,
            ("--genre", Some(genre)) => options.genre = genre.parse()?,
            ("--style", Some(style)) => options.art_style = style.parse()?,
            ("--scenes", Some(n)) => {
                options.num_scenes = n
                    .parse()
                    .map_err(|_| format!("Invalid --scenes value: {n}"))?
            }
            ("--prompt", Some(prompt)) => options.prompt = Some(prompt.clone()),
            (flag, _) if flag.starts_with("--") => return Err(format!("Unknown or incomplete option: {flag}")),
            _ => {
                i += 1;
                continue;
            }
        }
        i += 2;
    }

    Ok(options)
}
