/// Characters `escape_command` prefixes with a backslash.
const SHELL_META: &[char] = &[
	'#', '&', ';', '`', '|', '*', '?', '~', '<', '>', '^', '(', ')', '[', ']', '{', '}', '$',
	'\\', '\n', '\'', '"',
];

/// Quote a single argument for `sh`. The result is always single-quoted.
pub fn escape_arg(arg: &str) -> String {
	let mut out = String::with_capacity(arg.len() + 2);
	out.push('\'');
	for c in arg.chars() {
		if c == '\'' {
			out.push_str("'\\''");
		} else {
			out.push(c);
		}
	}
	out.push('\'');
	out
}

/// Backslash-escape shell metacharacters in a command. Spaces are kept, so a
/// command may still carry leading words of its own.
pub fn escape_command(cmd: &str) -> String {
	let mut out = String::with_capacity(cmd.len());
	for c in cmd.chars() {
		if SHELL_META.contains(&c) {
			out.push('\\');
		}
		out.push(c);
	}
	out
}

/// Arguments passed after the command.
///
/// `Named` entries render as `name` when the value is empty and as
/// `name='value'` otherwise. Names are trusted and never escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arguments {
	Positional(Vec<String>),
	Named(Vec<(String, Option<String>)>),
}

impl Default for Arguments {
	fn default() -> Self {
		Arguments::Positional(Vec::new())
	}
}

impl Arguments {
	pub fn none() -> Self {
		Self::default()
	}

	pub fn positional<I, S>(args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Arguments::Positional(args.into_iter().map(Into::into).collect())
	}

	pub fn named<I, K, V>(options: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		let mut args = Arguments::Named(Vec::new());
		for (name, value) in options {
			args = args.option(name, value);
		}
		args
	}

	/// Add a bare flag. Converts an empty positional set into a named one.
	pub fn flag(self, name: impl Into<String>) -> Self {
		self.insert(name.into(), None)
	}

	/// Add `name=value`. An existing name keeps its position and takes the new value.
	pub fn option(self, name: impl Into<String>, value: impl Into<String>) -> Self {
		let value: String = value.into();
		let value = if value.is_empty() { None } else { Some(value) };
		self.insert(name.into(), value)
	}

	fn insert(self, name: String, value: Option<String>) -> Self {
		let mut entries = match self {
			Arguments::Named(entries) => entries,
			Arguments::Positional(values) if values.is_empty() => Vec::new(),
			Arguments::Positional(values) => {
				// mixing shapes is a caller bug; keep what is already there
				return Arguments::Positional(values);
			}
		};
		match entries.iter_mut().find(|(n, _)| *n == name) {
			Some(entry) => entry.1 = value,
			None => entries.push((name, value)),
		}
		Arguments::Named(entries)
	}

	pub fn is_empty(&self) -> bool {
		match self {
			Arguments::Positional(v) => v.is_empty(),
			Arguments::Named(v) => v.is_empty(),
		}
	}

	pub fn len(&self) -> usize {
		match self {
			Arguments::Positional(v) => v.len(),
			Arguments::Named(v) => v.len(),
		}
	}

	/// Escape every value. Names pass through untouched.
	pub fn escaped(&self) -> EscapedArguments {
		match self {
			Arguments::Positional(values) => {
				EscapedArguments(values.iter().map(|v| escape_arg(v)).collect())
			}
			Arguments::Named(entries) => EscapedArguments(
				entries
					.iter()
					.map(|(name, value)| match value.as_deref() {
						None | Some("") => name.clone(),
						Some(v) => format!("{}={}", name, escape_arg(v)),
					})
					.collect(),
			),
		}
	}

	pub fn render(&self) -> String {
		self.escaped().render()
	}
}

/// Shell-ready argument tokens, in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EscapedArguments(Vec<String>);

impl EscapedArguments {
	pub fn tokens(&self) -> &[String] {
		&self.0
	}

	pub fn render(&self) -> String {
		self.0.join(" ")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_positional_render() {
		let args = Arguments::positional(["a", "b"]);
		assert_eq!(args.render(), "'a' 'b'");
	}

	#[test]
	fn test_named_render_keeps_order() {
		let args = Arguments::named([("-h", ""), ("--id", "Doc")]);
		assert_eq!(args.render(), "-h --id='Doc'");

		let args = Arguments::none()
			.option("--wait-time", "3")
			.flag("-v")
			.option("--id", "Sneezy");
		assert_eq!(args.render(), "--wait-time='3' -v --id='Sneezy'");
	}

	#[test]
	fn test_escaped_tokens() {
		let escaped = Arguments::named([("-h", ""), ("--id", "O'Brien")]).escaped();
		assert_eq!(escaped.tokens(), ["-h", "--id='O'\\''Brien'"]);
		assert_eq!(escaped.render(), "-h --id='O'\\''Brien'");
	}

	#[test]
	fn test_named_replace_in_place() {
		let args = Arguments::named([("--a", "1"), ("--b", "2")]).option("--a", "3");
		assert_eq!(args.render(), "--a='3' --b='2'");
		assert_eq!(args.len(), 2);
	}

	#[test]
	fn test_escape_arg_quotes() {
		assert_eq!(escape_arg(""), "''");
		assert_eq!(escape_arg("it's"), "'it'\\''s'");
		assert_eq!(escape_arg("$(rm -rf /)"), "'$(rm -rf /)'");
	}

	#[test]
	fn test_escape_command() {
		assert_eq!(escape_command("worker.sh"), "worker.sh");
		assert_eq!(escape_command("a;b"), "a\\;b");
		assert_eq!(escape_command("x $(y)"), "x \\$\\(y\\)");
		assert_eq!(escape_command("run it"), "run it");
	}

	#[test]
	fn test_empty_render() {
		assert_eq!(Arguments::none().render(), "");
		assert!(Arguments::none().is_empty());
	}

	#[test]
	fn test_flag_on_nonempty_positional_is_ignored() {
		let args = Arguments::positional(["a"]).flag("-x");
		assert_eq!(args, Arguments::positional(["a"]));
	}
}
