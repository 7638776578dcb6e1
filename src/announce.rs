//! Fixed spoken announcements and feedback phrasing.

pub const INSTRUCTIONS: &str = "Welcome to the quiz. Each question is read aloud, followed by its \
options. Once the options finish, a countdown starts and you can press a number key to answer. \
Press R to repeat the question, O to repeat the options, P to pause or resume, S to skip ahead to \
the countdown, and H for help at any time. Press Enter to begin.";

pub const HELP: &str = "Press keys one through nine to choose an option. R repeats the question, \
O repeats the options, P pauses or resumes narration, and S skips straight to the answer countdown.";

pub fn option_read(index: usize, text: &str) -> String {
    format!("Option {}. {}", index + 1, text)
}

pub fn correct_feedback() -> &'static str {
    "Correct!"
}

pub fn incorrect_feedback(correct: &str) -> String {
    format!("Incorrect. The correct answer was {correct}.")
}

pub fn timeout_feedback(correct: &str) -> String {
    format!("Time is up. The correct answer was {correct}.")
}

pub fn summary(score: usize, total: usize) -> String {
    format!("Quiz complete. You scored {score} out of {total}.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_are_numbered_from_one() {
        assert_eq!(option_read(0, "Paris"), "Option 1. Paris");
        assert_eq!(option_read(2, "Rome"), "Option 3. Rome");
    }
}
