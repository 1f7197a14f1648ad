use brackish::ast::Value;
use brackish::evaluator::{self, Environment};
use brackish::json::value_to_json;
use brackish::parser::parse;
use brackish::{Error, ParseErrorKind};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;

const SOURCE_NAME: &str = "<repl>";

fn main() {
    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

/// Whether more input could complete this parse failure
fn needs_more_input(error: &Error) -> bool {
    matches!(error, Error::ParseError(e) if e.kind == ParseErrorKind::Incomplete)
}

fn run_repl() {
    println!("Brackish interpreter");
    println!("Enter expressions like: [int-add 1 2 3]");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let env = evaluator::create_global_env();

    // Host procedure callable from user code, for demonstration purposes
    env.register_procedure("help", |_args| {
        print_help();
        Ok(Value::none())
    });

    let mut json_mode = false;
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() { "brackish> " } else { "     ...> " };
        match rl.readline(prompt) {
            Ok(line) => {
                if pending.is_empty() {
                    let command = line.trim();
                    if command.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(command);

                    // Handle special commands
                    match command.split_once(' ').unwrap_or((command, "")) {
                        (":help", _) => {
                            print_help();
                            continue;
                        }
                        (":env", _) => {
                            print_environment(&env);
                            continue;
                        }
                        (":json", _) => {
                            json_mode = !json_mode;
                            if json_mode {
                                println!("JSON output enabled (non-data results fall back to source form)");
                            } else {
                                println!("Source output enabled");
                            }
                            continue;
                        }
                        (":load", path) => {
                            load_file(path.trim(), &env, json_mode);
                            continue;
                        }
                        (":quit" | ":exit", _) => {
                            println!("Goodbye!");
                            break;
                        }
                        _ => {}
                    }
                } else {
                    let _ = rl.add_history_entry(line.trim());
                }

                pending.push_str(&line);
                pending.push('\n');

                let expr = match parse(&pending, SOURCE_NAME) {
                    Ok(expr) => expr,
                    // Keep reading until the expression is closed
                    Err(e) if needs_more_input(&e) => continue,
                    Err(e) => {
                        println!("Error: {e}");
                        pending.clear();
                        continue;
                    }
                };
                pending.clear();

                print_result(evaluator::eval_until_concrete(&expr, &env), json_mode);
            }

            Err(ReadlineError::Interrupted) if !pending.is_empty() => {
                // Abandon the partial expression
                pending.clear();
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn load_file(path: &str, env: &Environment, json_mode: bool) {
    if path.is_empty() {
        println!("Usage: :load <file>");
        return;
    }

    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            println!("Error: cannot read {path}: {e}");
            return;
        }
    };

    match parse(&source, path) {
        Ok(expr) => print_result(evaluator::eval_until_concrete(&expr, env), json_mode),
        Err(e) => println!("Error: {e}"),
    }
}

fn print_result(result: Result<Value, Error>, json_mode: bool) {
    match result {
        Ok(value) if json_mode => match value_to_json(&value) {
            Ok(json) => println!("{json}"),
            Err(_) => println!("{value}"), // Fallback to source form if conversion fails
        },
        Ok(value) => println!("{value}"),
        Err(e) => println!("Error: {e}"),
    }
}

fn print_help() {
    println!("Brackish interpreter:");
    println!("  :help         - Show this help message");
    println!("  :env          - Show current environment bindings");
    println!("  :json         - Toggle JSON output of results");
    println!("  :load <file>  - Parse and evaluate a file (imports resolve from the filesystem)");
    println!("  :quit         - Exit the interpreter");
    println!("  :exit         - Exit the interpreter");
    println!("  Ctrl+C        - Abandon a partial expression, or exit");
    println!();
    println!("Syntax:");
    println!("  Lists: [int-add 1 2]   Strings: 'text'   Floats: 1.5   Booleans: true/false");
    println!("  Options: none, [some x]");
    println!();
    println!("Forms:");
    println!("  [define name expr]            bind name in the current scope");
    println!("  [function [params] body]      lazy closure: arguments are passed unevaluated");
    println!("  [procedure [params] body]     eager closure: arguments are evaluated first");
    println!("  [if cond then else?]          only none and false are falsy");
    println!("  [match x [pattern result] ... [_ fallback]]");
    println!("  [int-add ...] [int-subtract ...]");
    println!("  [import 'file']               splice in another file's expression");
    println!();
    println!("Examples:");
    println!("  [define fib [function [n] [match n [0 0] [1 1]");
    println!("      [_ [int-add [fib [int-subtract n 1]] [fib [int-subtract n 2]]]]]]]");
    println!("  [fib 10]");
    println!();
}

fn print_environment(env: &Environment) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    // Separate builtins and host procedures from user-defined values
    let mut builtins = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        let is_builtin = matches!(
            &value,
            Value::Function(callable) | Value::Procedure(callable) if callable.name() == name
        );
        if is_builtin {
            builtins.push(name);
        } else {
            user_defined.push((name, value));
        }
    }

    if !builtins.is_empty() {
        println!("Built-in forms ({}):", builtins.len());
        // Print in columns for readability
        let mut col = 0;
        for name in builtins {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
